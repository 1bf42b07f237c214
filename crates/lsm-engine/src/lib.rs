//! A learned-index LSM key-value storage engine with value separation (`spec.md §1`): writes
//! land in a memtable and write-ahead log, flush into leveled `.ldb` tables, and large values are
//! appended to an external value log so the LSM tree itself only ever stores small fixed-size
//! locators. Selected levels train a piecewise-linear-regression index over their table's key
//! order, consulted before falling back to classical binary search (`spec.md §4.2`).

pub mod arbiter;
pub mod comparator;
pub mod db;
pub mod error;
pub mod filter;
pub mod format;
pub mod learned_index;
pub mod logger;
pub mod memtable;
pub mod options;
pub mod plr;
pub mod sstable;
pub mod stats;
pub mod table_cache;
pub mod version;
pub mod vlog;
pub mod write_batch;
pub mod write_log;

pub use db::Database;
pub use error::{ErrorCode, Result, Status};
pub use options::{Options, ReadOptions, WriteOptions};
