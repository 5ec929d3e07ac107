use calbridge_common::{ErrorKind, FromMessage};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("CalDAV server returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Category reported to callers in failure payloads.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection(_) => ErrorKind::Connection,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Remote { .. } | Self::Message { .. } => ErrorKind::Remote,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Configuration(format!("invalid CalDAV request: {err}"))
        } else if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Connection(format!("failed to reach CalDAV server: {err}"))
        } else if let Some(status) = err.status() {
            Self::remote(status.as_u16(), err.to_string())
        } else {
            Self::message(err.to_string())
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

calbridge_common::impl_context!();

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(Error::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(Error::connection("x").kind(), ErrorKind::Connection);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::remote(500, "boom").kind(), ErrorKind::Remote);
        assert_eq!(Error::message("x").kind(), ErrorKind::Remote);
    }

    #[test]
    fn remote_message_carries_status() {
        let err = Error::remote(507, "quota exceeded");
        assert_eq!(
            err.to_string(),
            "CalDAV server returned HTTP 507: quota exceeded"
        );
    }

    #[test]
    fn context_wraps_as_remote() {
        let err = "nope".parse::<u32>().context("reading SEQUENCE").unwrap_err();
        assert!(err.to_string().starts_with("reading SEQUENCE: "));
        assert_eq!(err.kind(), ErrorKind::Remote);
    }
}
