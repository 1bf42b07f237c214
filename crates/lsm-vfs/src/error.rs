use std::io;

use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

/// Errors surfaced by an [`Env`](crate::Env) implementation.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("lock already held on {0}")]
    AlreadyLocked(String),

    #[error("path not found: {0}")]
    NotFound(String),
}
