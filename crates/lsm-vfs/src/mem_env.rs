use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::env_trait::{ConcurrentWritableFile, Env, LearningPriority, RandomAccessFile, WritableFile};
use crate::error::{FsError, FsResult};

#[derive(Default)]
struct FsState {
    files: FxHashMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
    locked: FxHashMap<PathBuf, ()>,
}

/// An in-memory [`Env`](crate::Env), grounded on `anchored-vfs`'s `memory_fs` module.
///
/// Used by `lsm-engine`'s own test suite so DB-level tests (crash recovery, compaction,
/// snapshots) run deterministically and without touching a real disk.
#[derive(Clone)]
pub struct MemEnv {
    state: Arc<Mutex<FsState>>,
}

impl Default for MemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemEnv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FsState::default())),
        }
    }

    fn get_or_create(&self, path: &Path) -> Arc<Mutex<Vec<u8>>> {
        self.state
            .lock()
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

pub struct MemSequentialFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl Read for MemSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let remaining = &data[self.pos.min(data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

pub struct MemRandomAccessFile(Arc<Mutex<Vec<u8>>>);

impl RandomAccessFile for MemRandomAccessFile {
    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let data = self.0.lock();
        let offset = offset as usize;
        if offset.saturating_add(len) > data.len() {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read in MemEnv",
            )));
        }
        Ok(data[offset..offset + len].to_vec())
    }

    fn file_size(&self) -> FsResult<u64> {
        Ok(self.0.lock().len() as u64)
    }
}

pub struct MemWritableFile(Arc<Mutex<Vec<u8>>>);

impl Write for MemWritableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableFile for MemWritableFile {
    fn sync_data(&mut self) -> FsResult<()> {
        Ok(())
    }
}

pub struct MemConcurrentWritableFile {
    data: Arc<Mutex<Vec<u8>>>,
    logical_len: AtomicU64,
}

impl ConcurrentWritableFile for MemConcurrentWritableFile {
    fn reserve(&self, len: u64) -> FsResult<u64> {
        Ok(self.logical_len.fetch_add(len, Ordering::SeqCst))
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> FsResult<()> {
        let mut data = self.data.lock();
        let end = offset as usize + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> FsResult<()> {
        Ok(())
    }

    fn logical_len(&self) -> u64 {
        self.logical_len.load(Ordering::SeqCst)
    }
}

pub struct MemLockfile(PathBuf);

impl Env for MemEnv {
    type SequentialFile = MemSequentialFile;
    type RandomAccessFile = MemRandomAccessFile;
    type WritableFile = MemWritableFile;
    type ConcurrentWritableFile = MemConcurrentWritableFile;
    type Lockfile = MemLockfile;

    fn new_sequential_file(&self, path: &Path) -> FsResult<Self::SequentialFile> {
        let data = self
            .state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
        Ok(MemSequentialFile { data, pos: 0 })
    }

    fn new_random_access_file(&self, path: &Path) -> FsResult<Self::RandomAccessFile> {
        let data = self
            .state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
        Ok(MemRandomAccessFile(data))
    }

    fn new_writable_file(&self, path: &Path) -> FsResult<Self::WritableFile> {
        let data = Arc::new(Mutex::new(Vec::new()));
        self.state.lock().files.insert(path.to_path_buf(), data.clone());
        Ok(MemWritableFile(data))
    }

    fn new_concurrent_writable_file(&self, path: &Path) -> FsResult<Self::ConcurrentWritableFile> {
        let data = self.get_or_create(path);
        let logical_len = data.lock().len() as u64;
        Ok(MemConcurrentWritableFile {
            data,
            logical_len: AtomicU64::new(logical_len),
        })
    }

    fn get_children(&self, dir: &Path) -> FsResult<Vec<String>> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter_map(|path| {
                let parent = path.parent()?;
                if parent == dir {
                    path.file_name()?.to_str().map(str::to_owned)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn delete_file(&self, path: &Path) -> FsResult<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    fn rename_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let mut state = self.state.lock();
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| FsError::NotFound(from.display().to_string()))?;
        state.files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn create_dir(&self, _path: &Path) -> FsResult<()> {
        Ok(())
    }

    fn delete_dir(&self, _path: &Path) -> FsResult<()> {
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }

    fn file_size(&self, path: &Path) -> FsResult<u64> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|data| data.lock().len() as u64)
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))
    }

    fn link_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let data = self
            .state
            .lock()
            .files
            .get(from)
            .cloned()
            .ok_or_else(|| FsError::NotFound(from.display().to_string()))?;
        self.state.lock().files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> FsResult<()> {
        let bytes = self
            .state
            .lock()
            .files
            .get(from)
            .map(|data| data.lock().clone())
            .ok_or_else(|| FsError::NotFound(from.display().to_string()))?;
        self.state
            .lock()
            .files
            .insert(to.to_path_buf(), Arc::new(Mutex::new(bytes)));
        Ok(())
    }

    fn lock_file(&self, path: &Path) -> FsResult<Self::Lockfile> {
        let mut state = self.state.lock();
        if state.locked.contains_key(path) {
            return Err(FsError::AlreadyLocked(path.display().to_string()));
        }
        state.locked.insert(path.to_path_buf(), ());
        Ok(MemLockfile(path.to_path_buf()))
    }

    fn unlock_file(&self, lock: Self::Lockfile) -> FsResult<()> {
        self.state.lock().locked.remove(&lock.0);
        Ok(())
    }

    fn new_logger(&self, path: &Path) -> FsResult<Self::WritableFile> {
        let data = self.get_or_create(path);
        Ok(MemWritableFile(data))
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
        // Run synchronously: deterministic for tests, and still exercises the same closures
        // the real environment would run on a worker thread.
        f();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;
    use std::path::Path;

    use super::*;

    #[test]
    fn write_then_sequential_read_round_trips() {
        let env = MemEnv::new();
        let path = Path::new("/db/000001.log");

        let mut w = env.new_writable_file(path).unwrap();
        w.write_all(b"hello world").unwrap();
        w.sync_data().unwrap();

        let mut r = env.new_sequential_file(path).unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn random_access_reads_exact_range() {
        let env = MemEnv::new();
        let path = Path::new("/db/000001.ldb");
        let mut w = env.new_writable_file(path).unwrap();
        w.write_all(b"0123456789").unwrap();

        let r = env.new_random_access_file(path).unwrap();
        assert_eq!(r.read_at(3, 4).unwrap(), b"3456");
        assert!(r.read_at(8, 10).is_err());
    }

    #[test]
    fn concurrent_writers_claim_disjoint_ranges() {
        let env = MemEnv::new();
        let path = Path::new("/db/vlog.txt");
        let file = env.new_concurrent_writable_file(path).unwrap();

        let a = file.reserve(4).unwrap();
        let b = file.reserve(4).unwrap();
        assert_ne!(a, b);

        file.write_at(a, b"aaaa").unwrap();
        file.write_at(b, b"bbbb").unwrap();

        let reader = env.new_random_access_file(path).unwrap();
        assert_eq!(reader.read_at(a, 4).unwrap(), b"aaaa");
        assert_eq!(reader.read_at(b, 4).unwrap(), b"bbbb");
    }

    #[test]
    fn lock_file_rejects_second_holder() {
        let env = MemEnv::new();
        let path = Path::new("/db/LOCK");
        let lock = env.lock_file(path).unwrap();
        assert!(env.lock_file(path).is_err());
        env.unlock_file(lock).unwrap();
        assert!(env.lock_file(path).is_ok());
    }
}
