//! Tunables controlling how a database is opened and how reads/writes behave
//! (`spec.md §6`), grounded on the teacher's `options_.rs`/`options/open_options.rs`.
//!
//! The teacher spreads these across a generic `OpenOptions<OOG>` parameterized by filesystem,
//! logger, comparator, and compactor-handle types; this workspace has exactly one concrete
//! engine, so `Options` is a plain struct instead of a generic one.

use crate::arbiter::ArbiterPolicy;
use crate::version::DEFAULT_STRAIGHT_READS_TRIGGER;

/// Options governing how [`crate::db::Database::open`] behaves and how the engine tunes its
/// memtable, table, and value-log sizing.
#[derive(Debug, Clone)]
pub struct Options {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub paranoid_checks: bool,

    /// Bytes of writes buffered in the active memtable before it rotates to immutable and a
    /// new one is opened (`spec.md §4.6`).
    pub write_buffer_size: usize,
    /// Target size of a freshly-built `.ldb` table file.
    pub max_file_size: usize,
    /// Bloom filter bits per key (`spec.md §1`).
    pub filter_bits_per_key: u32,

    /// The arbiter's override knob (`spec.md §4.3`).
    pub arbiter_policy: ArbiterPolicy,
    /// PLR error bound used when training a file's learned index (`spec.md §4.1`).
    pub learned_index_epsilon: i64,
    /// Engine-wide reads since the last write past this count allow the background thread to
    /// run a seek-driven compaction of whichever file last exhausted its per-file allowed-seek
    /// budget, even if no level's compaction score crosses its threshold (`spec.md §4.7`).
    pub straight_reads_trigger: u32,

    /// How many open `.ldb` file handles the table cache keeps resident (`spec.md §4.4`).
    pub max_open_files: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_file_size: 2 * 1024 * 1024,
            filter_bits_per_key: 10,
            arbiter_policy: ArbiterPolicy::CostBenefit,
            learned_index_epsilon: crate::plr::DEFAULT_EPSILON,
            straight_reads_trigger: DEFAULT_STRAIGHT_READS_TRIGGER,
            max_open_files: 1000,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    #[must_use]
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    #[must_use]
    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn arbiter_policy(mut self, policy: ArbiterPolicy) -> Self {
        self.arbiter_policy = policy;
        self
    }
}

/// Per-call read tunables (`spec.md §4.7`'s snapshot reads, and whether a read counts toward a
/// file's seek-compaction budget).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub snapshot: Option<crate::format::SequenceNumber>,
}

/// Per-call write tunables: whether to `fsync` the WAL segment before returning
/// (`spec.md §4.5`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub sync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_override_defaults() {
        let opts = Options::new().create_if_missing(true).write_buffer_size(1024);
        assert!(opts.create_if_missing);
        assert_eq!(opts.write_buffer_size, 1024);
        assert!(!opts.error_if_exists);
    }
}
