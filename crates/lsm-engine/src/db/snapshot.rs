//! Reference-counted read snapshots (`spec.md §4.7`), grounded on the teacher's
//! `snapshot.rs`'s `Snapshot`/`SnapshotList`.
//!
//! The teacher parameterizes `Snapshot`/`SnapshotList` over a refcounting family
//! (`Rc`/`RefCell` for single-threaded use, `Arc`/`Mutex` for shared use) via `RefcountedFamily`;
//! this workspace is always shared across the background compaction thread, so it collapses
//! straight to the `Arc`/`Mutex` instantiation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::SequenceNumber;

#[derive(Default)]
struct SnapshotListInner {
    /// Refcount per outstanding sequence number; a sequence number is alive as long as its
    /// count is nonzero.
    refcounts: BTreeMap<SequenceNumber, u32>,
}

/// The set of sequence numbers any live [`Snapshot`] still pins, shared between the foreground
/// write path (which must not let compaction drop an entry still visible to a snapshot) and
/// the background compactor (`spec.md §4.7`).
#[derive(Clone, Default)]
pub struct SnapshotList {
    inner: Arc<Mutex<SnapshotListInner>>,
}

impl SnapshotList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn acquire(&self, sequence: SequenceNumber) -> Snapshot {
        *self.inner.lock().refcounts.entry(sequence).or_insert(0) += 1;
        Snapshot { list: self.inner.clone(), sequence }
    }

    /// The oldest sequence number still pinned by a live snapshot, if any. Compaction must not
    /// drop any version of a key still visible at or above this sequence number.
    #[must_use]
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.inner.lock().refcounts.keys().next().copied()
    }
}

/// An RAII handle pinning one sequence number; dropping it releases the pin.
pub struct Snapshot {
    list: Arc<Mutex<SnapshotListInner>>,
    sequence: SequenceNumber,
}

impl Snapshot {
    #[must_use]
    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut inner = self.list.lock();
        if let Some(count) = inner.refcounts.get_mut(&self.sequence) {
            *count -= 1;
            if *count == 0 {
                inner.refcounts.remove(&self.sequence);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_tracks_the_minimum_live_sequence_number() {
        let list = SnapshotList::new();
        let a = list.acquire(10);
        let _b = list.acquire(5);
        assert_eq!(list.oldest(), Some(5));
        drop(a);
        assert_eq!(list.oldest(), Some(5));
    }

    #[test]
    fn dropping_every_snapshot_at_a_sequence_clears_it() {
        let list = SnapshotList::new();
        let a = list.acquire(7);
        let b = list.acquire(7);
        drop(a);
        assert_eq!(list.oldest(), Some(7));
        drop(b);
        assert_eq!(list.oldest(), None);
    }
}
