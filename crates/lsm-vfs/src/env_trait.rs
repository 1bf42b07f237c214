use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::FsResult;

/// A file opened for sequential, forward-only reads (WAL replay, manifest replay, full-file
/// table scans during `fill`).
pub trait SequentialFile: Read + Send {}
impl<T: Read + Send> SequentialFile for T {}

/// A file that can be read at arbitrary positions without disturbing other readers of the
/// same handle. Used for table reads and value-log reads.
pub trait RandomAccessFile: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`, or fails with an I/O error (including
    /// a short read, which is always treated as corruption per `spec.md §4.5`/`§7`).
    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>>;

    fn file_size(&self) -> FsResult<u64>;
}

/// A file opened for exclusive sequential writes: WAL segments, MANIFEST segments, and
/// `.ldb` table files are all built this way.
pub trait WritableFile: Write + Send {
    fn sync_data(&mut self) -> FsResult<()>;
}

/// A file that multiple foreground writers may append to concurrently, used by the value
/// log (`spec.md §4.5`). `reserve` atomically claims `len` bytes starting at the file's
/// current logical end and returns that starting offset; callers then `write_at` that exact
/// range. No two `reserve` calls ever return overlapping ranges.
pub trait ConcurrentWritableFile: Send + Sync {
    fn reserve(&self, len: u64) -> FsResult<u64>;

    fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<()>;

    fn sync(&self) -> FsResult<()>;

    fn logical_len(&self) -> u64;
}

/// Priority hint for [`Env::schedule_learning`]; learning a level-0 file (small, about to be
/// superseded) matters less than learning a file that just landed in a stable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LearningPriority {
    Low,
    High,
}

/// The operating-system surface the engine is written against (`spec.md §6`).
///
/// `spec.md` treats OS file primitives as "external collaborators, referenced only by
/// contract" (`§1`); this trait is that contract.
pub trait Env: Send + Sync + 'static {
    type SequentialFile: SequentialFile;
    type RandomAccessFile: RandomAccessFile;
    type WritableFile: WritableFile;
    type ConcurrentWritableFile: ConcurrentWritableFile;
    type Lockfile: Send;

    fn new_sequential_file(&self, path: &Path) -> FsResult<Self::SequentialFile>;

    fn new_random_access_file(&self, path: &Path) -> FsResult<Self::RandomAccessFile>;

    /// Creates (truncating if necessary) a file for exclusive sequential writing.
    fn new_writable_file(&self, path: &Path) -> FsResult<Self::WritableFile>;

    /// Creates (or opens, if `append` is set and the file exists) a file supporting
    /// concurrent appenders, used for the value log.
    fn new_concurrent_writable_file(&self, path: &Path) -> FsResult<Self::ConcurrentWritableFile>;

    fn get_children(&self, dir: &Path) -> FsResult<Vec<String>>;

    fn delete_file(&self, path: &Path) -> FsResult<()>;

    fn rename_file(&self, from: &Path, to: &Path) -> FsResult<()>;

    fn create_dir(&self, path: &Path) -> FsResult<()>;

    fn delete_dir(&self, path: &Path) -> FsResult<()>;

    fn file_exists(&self, path: &Path) -> bool;

    fn file_size(&self, path: &Path) -> FsResult<u64>;

    /// Hard-links `from` to `to`, used by live backup (`spec.md §4.7`) to snapshot table
    /// files without copying their bytes.
    fn link_file(&self, from: &Path, to: &Path) -> FsResult<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> FsResult<()>;

    fn lock_file(&self, path: &Path) -> FsResult<Self::Lockfile>;

    fn unlock_file(&self, lock: Self::Lockfile) -> FsResult<()>;

    /// Opens (creating if necessary) the append-only info log at `path`.
    fn new_logger(&self, path: &Path) -> FsResult<Self::WritableFile>;

    fn now_micros(&self) -> u64;

    fn sleep_for_micros(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }

    /// Spawns a long-lived background thread (used for the flush and compaction threads).
    fn start_thread(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>);

    /// Schedules a short-lived learning task (PLR training for one file) to run on a
    /// background worker, per `spec.md §4.7`'s "schedules learning for the new file via the
    /// environment's learning queue".
    fn schedule_learning(
        &self,
        priority: LearningPriority,
        f: Box<dyn FnOnce() + Send + 'static>,
    );

    /// Advisory hook: records that `file_number` at `level` became learnable at `timestamp`
    /// (microseconds). Implementations may use this for diagnostics; the default is a no-op.
    fn prepare_learning(&self, _timestamp: u64, _level: u8, _file_number: u64) {}
}
