//! Error plumbing shared by the calbridge crates.

pub mod error;

pub use error::{Error, ErrorKind, FromMessage, Result};
