//! The in-memory, concurrently-writable sorted map described in `spec.md §3`: "Ordered map
//! from internal key to either a locator (Value) or an empty payload (Deletion). Reference-
//! counted. Two live instances maximum: active (mutated) and immutable (being flushed)."
//!
//! The teacher builds its memtable on a custom externally-synchronized skiplist crate. This
//! workspace grounds the same concurrent-sorted-container requirement (`spec.md §4.7`: "the
//! memtable being a concurrent sorted container") on `crossbeam-skiplist`, a lock-free skiplist
//! that several real LSM engines in this corpus (`fjall-rs/lsm-tree`) use directly, which keeps
//! the foreground write path lock-free without hand-writing unsafe skiplist internals.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::comparator::Comparator;
use crate::format::{compare_internal_keys, lookup_key, split_internal_key, SequenceNumber, ValueLocator};

/// An internal key, ordered per `compare_internal_keys` under a `BytewiseComparator`.
///
/// `crossbeam-skiplist` needs a `K: Ord`; rather than thread a comparator object through the
/// skiplist's generic machinery (as the teacher's trait-heavy skiplist does), this type
/// hardcodes bytewise user-key order, matching `comparator::BytewiseComparator` being this
/// workspace's one shipped comparator (`spec.md §1` lists comparator traits as fixed, not
/// pluggable, interfaces).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKeyBytes(pub Vec<u8>);

impl PartialOrd for InternalKeyBytes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKeyBytes {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_internal_keys(&self.0, &other.0, &|a, b| a.cmp(b))
    }
}

/// The memtable's stored value: `Some(locator)` for a live value, `None` for a tombstone.
pub type MemtableValue = Option<ValueLocator>;

/// A reference-counted, insert-only sorted map of internal keys. Clones share the same
/// underlying skiplist (`spec.md §3`: "Reference-counted").
#[derive(Clone)]
pub struct Memtable {
    list: Arc<SkipMap<InternalKeyBytes, MemtableValue>>,
    approx_bytes: Arc<AtomicUsize>,
}

impl Memtable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: Arc::new(SkipMap::new()),
            approx_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Inserts one internal-key entry. Entries are never removed except by a full memtable
    /// drop; this is append-only, consistent with an LSM memtable.
    pub fn insert(&self, encoded_internal_key: Vec<u8>, value: MemtableValue) {
        let approx_len = encoded_internal_key.len() + value.map_or(0, |_| 12) + 24;
        self.list.insert(InternalKeyBytes(encoded_internal_key), value);
        self.approx_bytes.fetch_add(approx_len, AtomicOrdering::Relaxed);
    }

    #[must_use]
    pub fn approximate_bytes(&self) -> usize {
        self.approx_bytes.load(AtomicOrdering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Looks up the newest entry for `user_key` with `sequence <= snapshot` (`spec.md §3`:
    /// "Snapshots pin a sequence; readers see the newest record with sequence <= their
    /// snapshot"). Returns `Some(Some(locator))` for a live value, `Some(None)` for a
    /// tombstone (so callers can stop searching older levels), or `None` if absent entirely.
    #[must_use]
    pub fn get(&self, user_key: &[u8], snapshot: SequenceNumber) -> Option<MemtableValue> {
        let seek = lookup_key(user_key, snapshot);
        let entry = self.list.lower_bound(std::ops::Bound::Included(&InternalKeyBytes(seek)))?;
        let (found_user_key, _, _) = split_internal_key(&entry.key().0)?;
        if found_user_key == user_key {
            Some(*entry.value())
        } else {
            None
        }
    }

    /// Iterates all entries in internal-key order, for use by the flush path and by
    /// memtable-backed iterators (`spec.md §4.7`: "builds a new level-0 table from imm").
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, MemtableValue)> + '_ {
        self.list.iter().map(|entry| (entry.key().0.clone(), *entry.value()))
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker type kept so `Comparator` stays referenced from this module's documentation; the
/// memtable itself only ever orders bytewise (see [`InternalKeyBytes`]).
pub fn _assert_comparator_trait_object_safe(_c: &dyn Comparator) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{append_internal_key, EntryType};

    fn locator(offset: u64) -> ValueLocator {
        ValueLocator { offset, size: 1 }
    }

    #[test]
    fn get_returns_newest_visible_value() {
        let mem = Memtable::new();
        mem.insert(append_internal_key(b"k", 1, EntryType::Value), Some(locator(1)));
        mem.insert(append_internal_key(b"k", 5, EntryType::Value), Some(locator(5)));
        mem.insert(append_internal_key(b"k", 3, EntryType::Value), Some(locator(3)));

        assert_eq!(mem.get(b"k", 10), Some(Some(locator(5))));
        assert_eq!(mem.get(b"k", 4), Some(Some(locator(3))));
        assert_eq!(mem.get(b"k", 2), Some(Some(locator(1))));
        assert_eq!(mem.get(b"k", 0), None);
    }

    #[test]
    fn deletion_shadows_older_value() {
        let mem = Memtable::new();
        mem.insert(append_internal_key(b"k", 1, EntryType::Value), Some(locator(1)));
        mem.insert(append_internal_key(b"k", 2, EntryType::Deletion), None);

        assert_eq!(mem.get(b"k", 10), Some(None));
    }

    #[test]
    fn missing_key_returns_none() {
        let mem = Memtable::new();
        mem.insert(append_internal_key(b"a", 1, EntryType::Value), Some(locator(1)));
        assert_eq!(mem.get(b"zzz", 10), None);
    }

    #[test]
    fn iter_is_in_internal_key_order() {
        let mem = Memtable::new();
        mem.insert(append_internal_key(b"b", 1, EntryType::Value), Some(locator(1)));
        mem.insert(append_internal_key(b"a", 1, EntryType::Value), Some(locator(2)));
        let keys: Vec<Vec<u8>> = mem.iter().map(|(k, _)| split_internal_key(&k).unwrap().0.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
