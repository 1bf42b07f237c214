//! Per-file metadata tracked by a [`Version`](super::Version), grounded on the teacher's
//! `version::file_metadata` module.

use crate::format::SequenceNumber;

/// Describes one `<n>.ldb` table file within a `Version`.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_number: u64,
    pub file_size: u64,
    /// Smallest/largest encoded internal key in the file.
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    /// Read-triggered compaction counter (`spec.md §4.7`): decremented on every lookup that
    /// touches this file; the file becomes `file_to_compact` when it reaches zero.
    pub allowed_seeks: std::sync::Arc<std::sync::atomic::AtomicI64>,
    /// Set once the learned index has completed training for this file (`spec.md §4.2`).
    pub learned: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl FileMetadata {
    #[must_use]
    pub fn new(file_number: u64, file_size: u64, smallest: Vec<u8>, largest: Vec<u8>) -> Self {
        // 1 seek allowed per 16KB, with a floor of 100, matching classical LevelDB's
        // `allowed_seeks` initialization ratio.
        let allowed_seeks = (file_size / (16 * 1024)).max(100) as i64;
        Self {
            file_number,
            file_size,
            smallest,
            largest,
            allowed_seeks: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(allowed_seeks)),
            learned: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn smallest_sequence(&self) -> Option<SequenceNumber> {
        crate::format::split_internal_key(&self.smallest).map(|(_, seq, _)| seq)
    }

    #[must_use]
    pub fn largest_sequence(&self) -> Option<SequenceNumber> {
        crate::format::split_internal_key(&self.largest).map(|(_, seq, _)| seq)
    }

    /// Records one lookup against this file; returns `true` the first time the counter
    /// reaches zero (the file should become `file_to_compact`).
    #[must_use]
    pub fn record_seek(&self) -> bool {
        use std::sync::atomic::Ordering;
        let prev = self.allowed_seeks.fetch_sub(1, Ordering::Relaxed);
        prev == 1
    }

    #[must_use]
    pub fn is_learned(&self) -> bool {
        self.learned.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn mark_learned(&self) {
        self.learned.store(true, std::sync::atomic::Ordering::Release);
    }
}
