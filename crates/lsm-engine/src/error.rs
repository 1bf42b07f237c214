//! The status model of `spec.md §7`.

use std::fmt;

use lsm_vfs::FsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Status>;

/// A `Status`: an [`ErrorCode`] plus a human-readable message. Equality (used by tests)
/// ignores the message, matching `spec.md §7`: "equality ignores message".
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: ErrorCode,
    pub message: String,
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}
impl Eq for Status {}

impl Status {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Corruption, message)
    }

    #[must_use]
    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IoError, message)
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    #[must_use]
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, message)
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    NotFound,
    Corruption,
    NotSupported,
    InvalidArgument,
    IoError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "Ok",
            Self::NotFound => "NotFound",
            Self::Corruption => "Corruption",
            Self::NotSupported => "NotSupported",
            Self::InvalidArgument => "InvalidArgument",
            Self::IoError => "IOError",
        };
        f.write_str(s)
    }
}

impl From<FsError> for Status {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(path) => Status::not_found(path),
            other => Status::io_error(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Status::not_found(err.to_string())
        } else {
            Status::io_error(err.to_string())
        }
    }
}
