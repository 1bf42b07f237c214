//! The `Env` abstraction the engine is built against (`spec.md §6`).
//!
//! Everything the storage engine needs from the operating system — sequential and random
//! file access, directory listing, file locking, thread spawning, and monotonic time — is
//! expressed as a trait here instead of being called directly, so that the engine's test
//! suite can run against [`MemEnv`] and real deployments run against [`StdEnv`].

mod env_trait;
mod std_env;
mod mem_env;
mod error;

pub use env_trait::{
    ConcurrentWritableFile, Env, LearningPriority, RandomAccessFile, SequentialFile,
    WritableFile,
};
pub use error::{FsError, FsResult};
pub use mem_env::MemEnv;
pub use std_env::StdEnv;
