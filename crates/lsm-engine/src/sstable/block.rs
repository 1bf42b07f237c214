//! Restart-point-compressed data/index blocks, grounded on classical LevelDB's `Block`/
//! `BlockBuilder` format (the teacher delegates this to the separate `anchored-sstable` crate;
//! this workspace keeps the format but implements it directly against `lsm-engine`'s own
//! encoded internal keys).
//!
//! Entry encoding: `shared_len:varint, unshared_len:varint, value_len:varint, key_delta, value`.
//! Every [`RESTART_INTERVAL`]-th entry restarts (`shared_len == 0`) so a reader can binary-search
//! restart points without decoding every entry. The block trailer is a `u32` restart count
//! preceded by the restart offsets themselves, one `u32` each.

use integer_encoding::{VarInt, VarIntWriter as _};

use crate::error::{Result, Status};

pub const RESTART_INTERVAL: usize = 16;

pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new(), restarts: vec![0], counter: 0, last_key: Vec::new(), finished: false }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Appends one entry; `key` must be `>=` the previously added key (callers write in sorted
    /// order, as every producer of a `BlockBuilder` in this crate does).
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "cannot add to a finished block");

        let shared = if self.counter < RESTART_INTERVAL {
            self.last_key.iter().zip(key).take_while(|(a, b)| a == b).count()
        } else {
            0
        };

        if self.counter >= RESTART_INTERVAL {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }

        let unshared = &key[shared..];
        self.buffer.write_varint(shared as u64).expect("Vec<u8> write cannot fail");
        self.buffer.write_varint(unshared.len() as u64).expect("Vec<u8> write cannot fail");
        self.buffer.write_varint(value.len() as u64).expect("Vec<u8> write cannot fail");
        self.buffer.extend_from_slice(unshared);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    pub fn finish(&mut self) -> &[u8] {
        if !self.finished {
            for &restart in &self.restarts {
                self.buffer.extend_from_slice(&restart.to_le_bytes());
            }
            self.buffer.extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
            self.finished = true;
        }
        &self.buffer
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One decoded entry read back out of a finished block.
pub struct BlockEntry {
    pub key: Vec<u8>,
    pub value_offset: usize,
    pub value_len: usize,
}

/// Decodes every entry in a finished block's raw bytes, in order. Used at table-open time,
/// where this workspace reads a table's data blocks eagerly into its in-memory key/value index
/// rather than seeking block-by-block per lookup (see `sstable::table`'s module doc).
pub fn decode_entries(block: &[u8]) -> Result<Vec<BlockEntry>> {
    if block.len() < 4 {
        return Err(Status::corruption("block too short to contain a restart count"));
    }
    let num_restarts = u32::from_le_bytes(block[block.len() - 4..].try_into().unwrap()) as usize;
    let restarts_start = block
        .len()
        .checked_sub(4 + num_restarts * 4)
        .ok_or_else(|| Status::corruption("block restart count overruns the block"))?;
    let data = &block[..restarts_start];

    let mut entries = Vec::new();
    let mut cursor = 0usize;
    let mut last_key: Vec<u8> = Vec::new();

    while cursor < data.len() {
        let (shared, used) = u64::decode_var(&data[cursor..]).ok_or_else(|| Status::corruption("bad shared length"))?;
        cursor += used;
        let (unshared, used) = u64::decode_var(&data[cursor..]).ok_or_else(|| Status::corruption("bad unshared length"))?;
        cursor += used;
        let (value_len, used) = u64::decode_var(&data[cursor..]).ok_or_else(|| Status::corruption("bad value length"))?;
        cursor += used;

        let unshared = unshared as usize;
        let value_len = value_len as usize;
        if cursor + unshared + value_len > data.len() {
            return Err(Status::corruption("block entry overruns the block"));
        }

        let mut key = Vec::with_capacity(shared as usize + unshared);
        key.extend_from_slice(&last_key[..shared as usize]);
        key.extend_from_slice(&data[cursor..cursor + unshared]);
        cursor += unshared;

        let value_offset = cursor;
        cursor += value_len;

        last_key = key.clone();
        entries.push(BlockEntry { key, value_offset, value_len });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entries_with_shared_prefixes() {
        let mut builder = BlockBuilder::new();
        builder.add(b"apple", b"1");
        builder.add(b"apricot", b"2");
        builder.add(b"banana", b"3");
        let block = builder.finish().to_vec();

        let entries = decode_entries(&block).unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"apple".as_slice(), b"apricot", b"banana"]);

        let values: Vec<&[u8]> = entries.iter().map(|e| &block[e.value_offset..e.value_offset + e.value_len]).collect();
        assert_eq!(values, vec![b"1".as_slice(), b"2", b"3"]);
    }

    #[test]
    fn forces_a_restart_after_the_configured_interval() {
        let mut builder = BlockBuilder::new();
        for i in 0..(RESTART_INTERVAL * 2 + 3) {
            builder.add(format!("key{i:05}").as_bytes(), b"v");
        }
        let block = builder.finish().to_vec();
        let num_restarts = u32::from_le_bytes(block[block.len() - 4..].try_into().unwrap());
        assert!(num_restarts >= 3);
    }

    #[test]
    fn truncated_block_is_reported_as_corruption() {
        assert!(decode_entries(&[1, 2, 3]).is_err());
    }
}
