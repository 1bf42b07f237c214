//! A batch of locator-bearing writes: the unit that is WAL-framed and inserted into the
//! memtable in one sequence-number range.
//!
//! Per `spec.md §3`/`§4.7`, values are appended to the value log *before* a batch is built —
//! the memtable (and hence the WAL, which is replayed straight into the memtable) only ever
//! stores fixed-size [`ValueLocator`]s, never raw values.

use integer_encoding::{VarInt, VarIntWriter as _};

use crate::format::{EntryType, SequenceNumber, ValueLocator, VALUE_LOCATOR_LEN};

#[derive(Debug, Clone, Copy)]
pub enum BatchEntry<'a> {
    Value { user_key: &'a [u8], locator: ValueLocator },
    Deletion { user_key: &'a [u8] },
}

/// An owned, to-be-inserted write batch. `put`/`delete` append entries; `encode` produces the
/// WAL record bytes, and `decode`/`for_each_entry` walk a previously-encoded record back into
/// entries (used both by memtable insertion and WAL replay).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// `sequence` is the first sequence number in this batch; entries are assigned
    /// `sequence, sequence + 1, ...` in order.
    sequence: SequenceNumber,
    count: u32,
    buf: Vec<u8>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.sequence = sequence;
    }

    pub fn put(&mut self, user_key: &[u8], locator: ValueLocator) {
        self.buf.push(EntryType::Value as u8);
        self.write_length_prefixed(user_key);
        self.buf.extend_from_slice(&locator.encode());
        self.count += 1;
    }

    pub fn delete(&mut self, user_key: &[u8]) {
        self.buf.push(EntryType::Deletion as u8);
        self.write_length_prefixed(user_key);
        self.count += 1;
    }

    fn write_length_prefixed(&mut self, bytes: &[u8]) {
        self.buf.write_varint(bytes.len() as u64).expect("Vec<u8> write cannot fail");
        self.buf.extend_from_slice(bytes);
    }

    /// Encodes the full WAL record: `sequence: u64 LE, count: u32 LE, entries...`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.buf.len());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.buf);
        out
    }

    pub fn decode(record: &[u8]) -> crate::error::Result<Self> {
        if record.len() < 12 {
            return Err(crate::error::Status::corruption("write batch too short"));
        }
        let sequence = u64::from_le_bytes(record[..8].try_into().unwrap());
        let count = u32::from_le_bytes(record[8..12].try_into().unwrap());
        Ok(Self { sequence, count, buf: record[12..].to_vec() })
    }

    /// Walks each entry in the batch, assigning sequence numbers starting at
    /// [`WriteBatch::sequence`] in insertion order.
    pub fn for_each_entry<'a>(
        &'a self,
        mut visit: impl FnMut(SequenceNumber, BatchEntry<'a>) -> crate::error::Result<()>,
    ) -> crate::error::Result<()> {
        let mut cursor = self.buf.as_slice();
        let mut seq = self.sequence;

        for _ in 0..self.count {
            let (tag, rest) = cursor
                .split_first()
                .ok_or_else(|| crate::error::Status::corruption("truncated write batch"))?;
            cursor = rest;
            let kind = EntryType::from_u8(*tag)
                .ok_or_else(|| crate::error::Status::corruption("bad batch entry tag"))?;

            let (key_len, used) = u64::decode_var(cursor)
                .ok_or_else(|| crate::error::Status::corruption("bad varint in batch"))?;
            cursor = &cursor[used..];
            let key_len = key_len as usize;
            if cursor.len() < key_len {
                return Err(crate::error::Status::corruption("truncated batch key"));
            }
            let (user_key, rest) = cursor.split_at(key_len);
            cursor = rest;

            let entry = match kind {
                EntryType::Value => {
                    if cursor.len() < VALUE_LOCATOR_LEN {
                        return Err(crate::error::Status::corruption("truncated locator"));
                    }
                    let (locator_bytes, rest) = cursor.split_at(VALUE_LOCATOR_LEN);
                    cursor = rest;
                    let locator = ValueLocator::decode(locator_bytes)
                        .ok_or_else(|| crate::error::Status::corruption("bad locator"))?;
                    BatchEntry::Value { user_key, locator }
                }
                EntryType::Deletion => BatchEntry::Deletion { user_key },
            };

            visit(seq, entry)?;
            seq += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_entries() {
        let mut batch = WriteBatch::new();
        batch.set_sequence(7);
        batch.put(b"a", ValueLocator { offset: 1, size: 2 });
        batch.delete(b"b");
        batch.put(b"c", ValueLocator { offset: 99, size: 4 });

        let encoded = batch.encode();
        let decoded = WriteBatch::decode(&encoded).unwrap();
        assert_eq!(decoded.sequence(), 7);
        assert_eq!(decoded.count(), 3);

        let mut seen = Vec::new();
        decoded
            .for_each_entry(|seq, entry| {
                seen.push((seq, format!("{entry:?}")));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, 7);
        assert_eq!(seen[2].0, 9);
    }
}
