use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::fs::FileExt as _;

use crossbeam_channel::{unbounded, Sender};
use fs4::FileExt as _;

use crate::env_trait::{Env, LearningPriority, RandomAccessFile, WritableFile};
use crate::error::{FsError, FsResult};

/// The real-filesystem [`Env`](crate::Env), backed directly by `std::fs`.
///
/// Grounded on `anchored-vfs`'s `std_fs` module: random access goes through
/// [`FileExt::read_at`]/[`FileExt::write_at`] so that concurrent readers and writers never
/// need to share a cursor or a lock.
#[derive(Debug)]
pub struct StdEnv {
    learning: Sender<Box<dyn FnOnce() + Send + 'static>>,
}

impl Default for StdEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl StdEnv {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Box<dyn FnOnce() + Send + 'static>>();
        // A small fixed pool of learning workers; PLR training is CPU-bound and short-lived,
        // so a handful of threads draining one queue is enough (`spec.md §5`: "any number of
        // on-demand learning tasks scheduled by the environment").
        for i in 0..2 {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("lsm-learn-{i}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })
                .expect("failed to spawn learning worker");
        }
        Self { learning: tx }
    }
}

pub struct StdRandomAccessFile(File);

impl RandomAccessFile for StdRandomAccessFile {
    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let mut buf = vec![0_u8; len];
        #[cfg(unix)]
        {
            self.0.read_at(&mut buf, offset).map_err(FsError::Io)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read as _, Seek as _, SeekFrom};
            let mut file = &self.0;
            file.seek(SeekFrom::Start(offset)).map_err(FsError::Io)?;
            file.read_exact(&mut buf).map_err(FsError::Io)?;
        }
        Ok(buf)
    }

    fn file_size(&self) -> FsResult<u64> {
        Ok(self.0.metadata().map_err(FsError::Io)?.len())
    }
}

pub struct StdWritableFile(File);

impl std::io::Write for StdWritableFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl WritableFile for StdWritableFile {
    fn sync_data(&mut self) -> FsResult<()> {
        self.0.sync_data().map_err(FsError::Io)
    }
}

/// An append-only file supporting disjoint concurrent writers via `pwrite`, grounding
/// `spec.md §4.5`'s "atomic cursor" value-log description.
pub struct StdConcurrentWritableFile {
    file: File,
    logical_len: AtomicU64,
}

impl crate::env_trait::ConcurrentWritableFile for StdConcurrentWritableFile {
    fn reserve(&self, len: u64) -> FsResult<u64> {
        Ok(self.logical_len.fetch_add(len, Ordering::SeqCst))
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> FsResult<()> {
        #[cfg(unix)]
        {
            self.file.write_at(data, offset).map_err(FsError::Io)?;
        }
        #[cfg(not(unix))]
        {
            // Non-unix fallback: serialize writes. Correct but not lock-free.
            use std::io::{Seek as _, SeekFrom, Write as _};
            static FALLBACK: std::sync::Mutex<()> = std::sync::Mutex::new(());
            let _guard = FALLBACK.lock().unwrap();
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset)).map_err(FsError::Io)?;
            file.write_all(data).map_err(FsError::Io)?;
        }
        Ok(())
    }

    fn sync(&self) -> FsResult<()> {
        self.file.sync_data().map_err(FsError::Io)
    }

    fn logical_len(&self) -> u64 {
        self.logical_len.load(Ordering::SeqCst)
    }
}

pub struct StdLockfile(File, std::path::PathBuf);

impl Env for StdEnv {
    type SequentialFile = File;
    type RandomAccessFile = StdRandomAccessFile;
    type WritableFile = StdWritableFile;
    type ConcurrentWritableFile = StdConcurrentWritableFile;
    type Lockfile = StdLockfile;

    fn new_sequential_file(&self, path: &Path) -> FsResult<Self::SequentialFile> {
        File::open(path).map_err(FsError::Io)
    }

    fn new_random_access_file(&self, path: &Path) -> FsResult<Self::RandomAccessFile> {
        File::open(path).map(StdRandomAccessFile).map_err(FsError::Io)
    }

    fn new_writable_file(&self, path: &Path) -> FsResult<Self::WritableFile> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map(StdWritableFile)
            .map_err(FsError::Io)
    }

    fn new_concurrent_writable_file(&self, path: &Path) -> FsResult<Self::ConcurrentWritableFile> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(FsError::Io)?;
        let logical_len = file.metadata().map_err(FsError::Io)?.len();
        Ok(StdConcurrentWritableFile {
            file,
            logical_len: AtomicU64::new(logical_len),
        })
    }

    fn get_children(&self, dir: &Path) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(FsError::Io)? {
            let entry = entry.map_err(FsError::Io)?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }

    fn delete_file(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(path).map_err(FsError::Io)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::rename(from, to).map_err(FsError::Io)
    }

    fn create_dir(&self, path: &Path) -> FsResult<()> {
        fs::create_dir_all(path).map_err(FsError::Io)
    }

    fn delete_dir(&self, path: &Path) -> FsResult<()> {
        fs::remove_dir(path).map_err(FsError::Io)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> FsResult<u64> {
        Ok(fs::metadata(path).map_err(FsError::Io)?.len())
    }

    fn link_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::hard_link(from, to).map_err(FsError::Io)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::copy(from, to).map(|_| ()).map_err(FsError::Io)
    }

    fn lock_file(&self, path: &Path) -> FsResult<Self::Lockfile> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(FsError::Io)?;
        file.try_lock_exclusive()
            .map_err(|_| FsError::AlreadyLocked(path.display().to_string()))?;
        Ok(StdLockfile(file, path.to_path_buf()))
    }

    fn unlock_file(&self, lock: Self::Lockfile) -> FsResult<()> {
        FileExt::unlock(&lock.0).map_err(FsError::Io)
    }

    fn new_logger(&self, path: &Path) -> FsResult<Self::WritableFile> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(StdWritableFile)
            .map_err(FsError::Io)
    }

    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    fn start_thread(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>) {
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(f)
            .expect("failed to spawn background thread");
    }

    fn schedule_learning(
        &self,
        _priority: LearningPriority,
        f: Box<dyn FnOnce() + Send + 'static>,
    ) {
        // Best-effort: if every worker has been dropped (shutdown), just drop the task.
        let _ = self.learning.send(f);
    }
}

/// Kept so `Arc<StdEnv>` implements [`Env`] directly, the way the engine holds its context.
impl Env for Arc<StdEnv> {
    type SequentialFile = File;
    type RandomAccessFile = StdRandomAccessFile;
    type WritableFile = StdWritableFile;
    type ConcurrentWritableFile = StdConcurrentWritableFile;
    type Lockfile = StdLockfile;

    fn new_sequential_file(&self, path: &Path) -> FsResult<Self::SequentialFile> {
        (**self).new_sequential_file(path)
    }
    fn new_random_access_file(&self, path: &Path) -> FsResult<Self::RandomAccessFile> {
        (**self).new_random_access_file(path)
    }
    fn new_writable_file(&self, path: &Path) -> FsResult<Self::WritableFile> {
        (**self).new_writable_file(path)
    }
    fn new_concurrent_writable_file(&self, path: &Path) -> FsResult<Self::ConcurrentWritableFile> {
        (**self).new_concurrent_writable_file(path)
    }
    fn get_children(&self, dir: &Path) -> FsResult<Vec<String>> {
        (**self).get_children(dir)
    }
    fn delete_file(&self, path: &Path) -> FsResult<()> {
        (**self).delete_file(path)
    }
    fn rename_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        (**self).rename_file(from, to)
    }
    fn create_dir(&self, path: &Path) -> FsResult<()> {
        (**self).create_dir(path)
    }
    fn delete_dir(&self, path: &Path) -> FsResult<()> {
        (**self).delete_dir(path)
    }
    fn file_exists(&self, path: &Path) -> bool {
        (**self).file_exists(path)
    }
    fn file_size(&self, path: &Path) -> FsResult<u64> {
        (**self).file_size(path)
    }
    fn link_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        (**self).link_file(from, to)
    }
    fn copy_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        (**self).copy_file(from, to)
    }
    fn lock_file(&self, path: &Path) -> FsResult<Self::Lockfile> {
        (**self).lock_file(path)
    }
    fn unlock_file(&self, lock: Self::Lockfile) -> FsResult<()> {
        (**self).unlock_file(lock)
    }
    fn new_logger(&self, path: &Path) -> FsResult<Self::WritableFile> {
        (**self).new_logger(path)
    }
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
    fn start_thread(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>) {
        (**self).start_thread(name, f)
    }
    fn schedule_learning(&self, priority: LearningPriority, f: Box<dyn FnOnce() + Send + 'static>) {
        (**self).schedule_learning(priority, f)
    }
    fn prepare_learning(&self, timestamp: u64, level: u8, file_number: u64) {
        (**self).prepare_learning(timestamp, level, file_number)
    }
}
