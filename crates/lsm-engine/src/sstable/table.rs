//! `.ldb` table files: one sorted run of internal keys, each mapping to either a
//! [`ValueLocator`] into the value log or nothing (a deletion tombstone), grounded on the
//! teacher's `table_file`/`anchored-sstable` table format.
//!
//! Unlike the teacher (which keeps data blocks compressed on disk and decodes them lazily,
//! block by block, per lookup), this workspace decodes every data block once at open time into
//! a flattened, sorted `Vec` of entries. That trade keeps `Table` simple enough to serve both
//! the classical binary-search read path and the learned-index read path (`spec.md §4.2`)
//! against the same in-memory array, and is affordable because values here are always the
//! 12-byte [`ValueLocator`] (or nothing) rather than the user's actual payload — the real
//! payload lives in the value log, not the table file.

use std::sync::Arc;

use lsm_vfs::RandomAccessFile;

use crate::error::{Result, Status};
use crate::format::{compare_internal_keys, split_internal_key, ValueLocator};

use super::block::{decode_entries, BlockBuilder};
use super::footer::{BlockHandle, Footer};
use crate::filter::{FilterBlockBuilder, FilterBlockReader};

/// Target uncompressed size of one data block before a table builder starts a new one,
/// matching classical LevelDB's default `block_size`.
pub const BLOCK_SIZE_TARGET: usize = 4 * 1024;

/// Builds a `.ldb` file from internal keys presented in increasing order.
pub struct TableBuilder {
    data_block: BlockBuilder,
    filter_builder: FilterBlockBuilder,
    index_entries: Vec<(Vec<u8>, BlockHandle)>,
    out: Vec<u8>,
    pending_index_key: Option<Vec<u8>>,
    pending_index_handle: Option<BlockHandle>,
    num_entries: u64,
    smallest: Option<Vec<u8>>,
    largest: Vec<u8>,
}

impl TableBuilder {
    #[must_use]
    pub fn new(bits_per_key: u32) -> Self {
        // A single filter partition covers the whole table: lookups here binary-search the
        // flattened in-memory entry array rather than one data block at a time, so there is no
        // block offset to key per-partition filters off of.
        let mut filter_builder = FilterBlockBuilder::new(bits_per_key);
        filter_builder.start_block(0);
        Self {
            data_block: BlockBuilder::new(),
            filter_builder,
            index_entries: Vec::new(),
            out: Vec::new(),
            pending_index_key: None,
            pending_index_handle: None,
            num_entries: 0,
            smallest: None,
            largest: Vec::new(),
        }
    }

    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    #[must_use]
    pub fn current_size_estimate(&self) -> usize {
        self.out.len() + self.data_block.current_size_estimate()
    }

    /// Adds one internal key and its value blob (empty for a deletion, else the encoded
    /// [`ValueLocator`]). `key` must be `>=` every previously added key.
    pub fn add(&mut self, key: &[u8], value_blob: &[u8]) {
        self.flush_pending_index_entry(Some(key));

        if self.smallest.is_none() {
            self.smallest = Some(key.to_vec());
        }
        self.largest.clear();
        self.largest.extend_from_slice(key);

        let user_key = split_internal_key(key).map_or(key, |(user, _, _)| user);
        self.filter_builder.add_key(user_key);
        self.data_block.add(key, value_blob);
        self.num_entries += 1;

        if self.data_block.current_size_estimate() >= BLOCK_SIZE_TARGET {
            self.flush_data_block();
        }
    }

    fn flush_data_block(&mut self) {
        if self.data_block.is_empty() {
            return;
        }
        let handle = BlockHandle { offset: self.out.len() as u64, size: self.data_block.finish().len() as u64 };
        self.out.extend_from_slice(self.data_block.finish());
        self.data_block = BlockBuilder::new();

        self.pending_index_key = Some(self.largest.clone());
        self.pending_index_handle = Some(handle);
    }

    /// Classical LevelDB delays writing an index entry until it knows the first key of the
    /// *next* block, so it can pick the shortest separator between the two; this workspace
    /// keeps it simple and just uses the exact last key of the finished block.
    fn flush_pending_index_entry(&mut self, _next_key: Option<&[u8]>) {
        if let (Some(key), Some(handle)) = (self.pending_index_key.take(), self.pending_index_handle.take()) {
            self.index_entries.push((key, handle));
        }
    }

    /// Finishes the table, returning the encoded bytes to write to disk.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush_data_block();
        self.flush_pending_index_entry(None);

        let filter_block = self.filter_builder.finish();
        let filter_handle = BlockHandle { offset: self.out.len() as u64, size: filter_block.len() as u64 };
        self.out.extend_from_slice(&filter_block);

        let mut metaindex_block = BlockBuilder::new();
        let mut handle_bytes = Vec::new();
        filter_handle.encode_into(&mut handle_bytes);
        metaindex_block.add(b"filter.bourbon", &handle_bytes);
        let metaindex_bytes = metaindex_block.finish().to_vec();
        let metaindex_handle = BlockHandle { offset: self.out.len() as u64, size: metaindex_bytes.len() as u64 };
        self.out.extend_from_slice(&metaindex_bytes);

        let mut index_block = BlockBuilder::new();
        for (key, handle) in &self.index_entries {
            let mut bytes = Vec::new();
            handle.encode_into(&mut bytes);
            index_block.add(key, &bytes);
        }
        let index_bytes = index_block.finish().to_vec();
        let index_handle = BlockHandle { offset: self.out.len() as u64, size: index_bytes.len() as u64 };
        self.out.extend_from_slice(&index_bytes);

        let footer = Footer { metaindex_handle, index_handle };
        self.out.extend_from_slice(&footer.encode());

        self.out
    }

    #[must_use]
    pub fn smallest_key(&self) -> Option<&[u8]> {
        self.smallest.as_deref()
    }

    #[must_use]
    pub fn largest_key(&self) -> &[u8] {
        &self.largest
    }
}

/// One flattened, decoded table entry kept resident for the lifetime of a [`Table`].
struct TableEntry {
    internal_key: Vec<u8>,
    /// `None` for a deletion tombstone; `Some` for a live value's locator into the value log.
    locator: Option<ValueLocator>,
}

/// An opened `.ldb` file: every entry decoded into a sorted in-memory array, plus its bloom
/// filter, ready to serve both classical and learned-index lookups (`spec.md §4.2`/`§4.4`).
pub struct Table {
    entries: Vec<TableEntry>,
    filter: Vec<u8>,
}

impl Table {
    pub fn open<F: RandomAccessFile>(file: &F, file_size: u64) -> Result<Arc<Self>> {
        if file_size < super::footer::ENCODED_LENGTH as u64 {
            return Err(Status::corruption("table file too short to contain a footer"));
        }
        let footer_bytes = file.read_at(file_size - super::footer::ENCODED_LENGTH as u64, super::footer::ENCODED_LENGTH)?;
        let footer = Footer::decode(&footer_bytes)?;

        let index_bytes = file.read_at(footer.index_handle.offset, footer.index_handle.size as usize)?;
        let index_entries = decode_entries(&index_bytes)?;

        let metaindex_bytes = file.read_at(footer.metaindex_handle.offset, footer.metaindex_handle.size as usize)?;
        let metaindex_entries = decode_entries(&metaindex_bytes)?;
        let filter_handle = metaindex_entries
            .iter()
            .find(|e| e.key == b"filter.bourbon")
            .map(|e| BlockHandle::decode(&metaindex_bytes[e.value_offset..e.value_offset + e.value_len]))
            .transpose()?
            .map(|(handle, _)| handle);

        let filter = match filter_handle {
            Some(handle) => file.read_at(handle.offset, handle.size as usize)?,
            None => Vec::new(),
        };

        let mut entries = Vec::new();
        let mut block_start = 0u64;
        for index_entry in &index_entries {
            let (handle, _) = BlockHandle::decode(&index_bytes[index_entry.value_offset..index_entry.value_offset + index_entry.value_len])?;
            let block_bytes = file.read_at(handle.offset, handle.size as usize)?;
            for entry in decode_entries(&block_bytes)? {
                let locator = if entry.value_len == 0 {
                    None
                } else {
                    Some(
                        ValueLocator::decode(&block_bytes[entry.value_offset..entry.value_offset + entry.value_len])
                            .ok_or_else(|| Status::corruption("malformed value locator in table entry"))?,
                    )
                };
                entries.push(TableEntry { internal_key: entry.key, locator });
            }
            block_start = handle.offset + handle.size;
        }
        let _ = block_start;

        Ok(Arc::new(Self { entries, filter }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn smallest_key(&self) -> Option<&[u8]> {
        self.entries.first().map(|e| e.internal_key.as_slice())
    }

    #[must_use]
    pub fn largest_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.internal_key.as_slice())
    }

    /// `true` if the bloom filter says `user_key` is definitely absent. An empty filter (no
    /// entries were added before the table's first block flushed) always returns `false`.
    #[must_use]
    pub fn filter_excludes(&self, user_key: &[u8]) -> bool {
        if self.filter.is_empty() {
            return false;
        }
        !FilterBlockReader::new(self.filter.clone()).key_may_match(0, user_key)
    }

    /// Classical binary-search lookup: the entry with the greatest internal key `<= target`
    /// whose user key matches `user_key`, if live.
    #[must_use]
    pub fn get_classical(&self, user_key: &[u8], snapshot: crate::format::SequenceNumber) -> Option<Option<ValueLocator>> {
        let target = crate::format::lookup_key(user_key, snapshot);
        let idx = self.entries.partition_point(|e| {
            compare_internal_keys(&e.internal_key, &target, &|a, b| a.cmp(b)) == std::cmp::Ordering::Less
        });
        let entry = self.entries.get(idx)?;
        let (found_user_key, _, _) = split_internal_key(&entry.internal_key)?;
        if found_user_key == user_key { Some(entry.locator.clone()) } else { None }
    }

    /// Reads back the entry at ordinal position `position` in file order, used by the learned
    /// index's local-search fallback (`spec.md §4.2`).
    #[must_use]
    pub fn entry_at(&self, position: usize) -> Option<(&[u8], Option<&ValueLocator>)> {
        let entry = self.entries.get(position)?;
        Some((&entry.internal_key, entry.locator.as_ref()))
    }

    /// User keys in file order, the training input for the per-file [`crate::plr::PlrModel`]
    /// (`spec.md §4.2`: "fill collects every key in a file in sorted order").
    pub fn user_keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().filter_map(|e| split_internal_key(&e.internal_key).map(|(user, _, _)| user))
    }

    /// Every entry in file order, used by compaction's k-way merge (`spec.md §4.6`).
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&ValueLocator>)> {
        self.entries.iter().map(|e| (e.internal_key.as_slice(), e.locator.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{append_internal_key, EntryType};
    use lsm_vfs::{Env, MemEnv};

    fn build_sample_table() -> Vec<u8> {
        let mut builder = TableBuilder::new(10);
        for i in 0..200u32 {
            let key = append_internal_key(format!("key{i:05}").as_bytes(), u64::from(i) + 1, EntryType::Value);
            builder.add(&key, &ValueLocator { offset: u64::from(i), size: 10 }.encode());
        }
        builder.finish()
    }

    #[test]
    fn builder_produces_a_table_that_opens_and_reads_back_every_key() {
        let bytes = build_sample_table();
        let env = MemEnv::new();
        let file = env.new_writable_file("t.ldb".as_ref()).unwrap();
        {
            use std::io::Write as _;
            let mut file = file;
            file.write_all(&bytes).unwrap();
        }
        let reader = env.new_random_access_file("t.ldb".as_ref()).unwrap();
        let table = Table::open(&reader, bytes.len() as u64).unwrap();

        assert_eq!(table.len(), 200);
        let key50 = append_internal_key(b"key00050", u64::MAX, EntryType::Value);
        let found = table.get_classical(b"key00050", u64::MAX).flatten();
        assert_eq!(found.unwrap().offset, 50);
        let _ = key50;
    }

    #[test]
    fn filter_excludes_absent_keys() {
        let bytes = build_sample_table();
        let env = MemEnv::new();
        let file = env.new_writable_file("t.ldb".as_ref()).unwrap();
        {
            use std::io::Write as _;
            let mut file = file;
            file.write_all(&bytes).unwrap();
        }
        let reader = env.new_random_access_file("t.ldb".as_ref()).unwrap();
        let table = Table::open(&reader, bytes.len() as u64).unwrap();

        assert!(table.filter_excludes(b"definitely-not-present-zzz"));
    }
}
