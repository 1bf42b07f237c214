//! Per-file learned indexes (`spec.md §4.2`), grounded on
//! `original_source/koo/learned_index.cpp`'s `fill`/`learn`/`get_position`/`mark_delete` API.
//!
//! A [`LearnedIndex`] wraps one file's trained [`PlrModel`] plus the min/max key integers and
//! row count `get_position` needs to bound its estimate. The engine decides per-file, via the
//! [`crate::arbiter::Arbiter`], whether a file's index is worth training; this module is the
//! trained artifact itself and the read-path fallback around it.

use crate::plr::{key_to_integer, train, PlrModel, PositionEstimate, DEFAULT_EPSILON};
use crate::sstable::Table;

/// A trained learned index over one table file's keys.
#[derive(Debug, Clone)]
pub struct LearnedIndex {
    model: PlrModel,
    min_key: u64,
    max_key: u64,
    size: u64,
}

impl LearnedIndex {
    /// `fill` + `learn`: reads every user key out of `table` in file order and trains a PLR
    /// model over `(key_to_integer(key), row_index)` pairs. Returns `None` if the file is empty
    /// (`spec.md §4.2`: "fill on an empty file yields no model").
    #[must_use]
    pub fn learn(table: &Table) -> Option<Self> {
        Self::learn_with_epsilon(table, DEFAULT_EPSILON)
    }

    #[must_use]
    pub fn learn_with_epsilon(table: &Table, epsilon: i64) -> Option<Self> {
        let points: Vec<(u64, u64)> = table
            .user_keys()
            .enumerate()
            .map(|(i, key)| (key_to_integer(key), i as u64))
            .collect();

        let min_key = points.first()?.0;
        let max_key = points.last()?.0;
        let size = points.len() as u64;
        let model = train(&points, epsilon)?;

        Some(Self { model, min_key, max_key, size })
    }

    /// Estimates the row-position range for `user_key`; `None` if the key's integer projection
    /// falls outside the file's trained range, in which case callers must fall back to the
    /// classical binary-search path (`spec.md §4.2`).
    #[must_use]
    pub fn get_position(&self, user_key: &[u8]) -> Option<(u64, u64)> {
        match self.model.get_position(user_key, self.min_key, self.max_key, self.size) {
            PositionEstimate::Range { lower, upper } => Some((lower, upper)),
            PositionEstimate::OutOfRange => None,
        }
    }
}

/// Looks up `user_key` in `table` via `index`'s estimated range, falling back to a local linear
/// scan within `[lower, upper]` (bounded by `2*epsilon + 1` entries) and finally to the
/// classical binary search if the estimate misses or the model is absent entirely
/// (`spec.md §4.2`: "a miss (wrong bound or stale model) falls back to the classical path,
/// never to a wrong answer").
#[must_use]
pub fn get_via_learned_index(
    table: &Table,
    index: Option<&LearnedIndex>,
    user_key: &[u8],
    snapshot: crate::format::SequenceNumber,
) -> LookupOutcome {
    let Some(index) = index else {
        return LookupOutcome {
            result: table.get_classical(user_key, snapshot),
            via_model: false,
        };
    };

    let Some((lower, upper)) = index.get_position(user_key) else {
        return LookupOutcome {
            result: table.get_classical(user_key, snapshot),
            via_model: false,
        };
    };

    for position in lower..=upper {
        let Some((internal_key, locator)) = table.entry_at(position as usize) else {
            continue;
        };
        let Some((found_user_key, found_seq, _)) = crate::format::split_internal_key(internal_key) else {
            continue;
        };
        if found_user_key == user_key && found_seq <= snapshot {
            return LookupOutcome { result: Some(locator.copied()), via_model: true };
        }
    }

    // The model's range missed the actual entry (training error beyond epsilon, or a stale
    // model after the file changed); classical search is always correct, so fall back to it.
    LookupOutcome { result: table.get_classical(user_key, snapshot), via_model: false }
}

pub struct LookupOutcome {
    pub result: Option<Option<crate::format::ValueLocator>>,
    pub via_model: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{append_internal_key, EntryType, ValueLocator};
    use crate::sstable::TableBuilder;
    use lsm_vfs::{Env, MemEnv};
    use std::io::Write as _;

    fn build_table(count: u32) -> std::sync::Arc<Table> {
        let mut builder = TableBuilder::new(10);
        for i in 0..count {
            let key = append_internal_key(format!("{:08}", i * 10).as_bytes(), u64::from(i) + 1, EntryType::Value);
            builder.add(&key, &ValueLocator { offset: u64::from(i), size: 1 }.encode());
        }
        let bytes = builder.finish();

        let env = MemEnv::new();
        let mut file = env.new_writable_file("t.ldb".as_ref()).unwrap();
        file.write_all(&bytes).unwrap();
        drop(file);
        let reader = env.new_random_access_file("t.ldb".as_ref()).unwrap();
        Table::open(&reader, bytes.len() as u64).unwrap()
    }

    #[test]
    fn learn_trains_over_every_key_in_file_order() {
        let table = build_table(200);
        let index = LearnedIndex::learn(&table).unwrap();
        assert_eq!(index.size, 200);
    }

    #[test]
    fn learn_returns_none_for_an_empty_table() {
        let table = build_table(0);
        assert!(LearnedIndex::learn(&table).is_none());
    }

    #[test]
    fn get_via_learned_index_finds_present_keys_through_the_model() {
        let table = build_table(300);
        let index = LearnedIndex::learn(&table).unwrap();

        let outcome = get_via_learned_index(&table, Some(&index), b"00000500", u64::MAX);
        let locator = outcome.result.flatten().unwrap();
        assert_eq!(locator.offset, 50);
    }

    #[test]
    fn get_via_learned_index_falls_back_for_out_of_range_keys() {
        let table = build_table(10);
        let index = LearnedIndex::learn(&table).unwrap();

        let outcome = get_via_learned_index(&table, Some(&index), b"99999999", u64::MAX);
        assert!(!outcome.via_model);
        assert!(outcome.result.is_none());
    }
}
