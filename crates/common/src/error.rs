use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Caller-visible failure category attached to every failed tool payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or unusable credentials / endpoint.
    Configuration,
    /// Authentication or network failure talking to the calendar server.
    Connection,
    /// A calendar name or event identifier did not resolve.
    NotFound,
    /// Input rejected before any remote call was made.
    Validation,
    /// Anything else the calendar server reported.
    Remote,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Error types that can be built from a plain message string.
///
/// Implement this for a crate's error type, then invoke [`impl_context!`]
/// next to it to get `.context()` and `.with_context()` on `Result` and
/// `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and
/// `.with_context()` on `Result` and `Option`.
///
/// The invoking module must define `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/caldav/src/error.rs
/// calbridge_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
