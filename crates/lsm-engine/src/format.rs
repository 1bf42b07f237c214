//! Internal key and value-locator formats (`spec.md §3`).
//!
//! Mirrors the teacher's `format.rs`: a [`SequenceNumber`] and [`EntryType`] are packed into
//! an 8-byte tag appended after the user key, giving the classic LevelDB `InternalKey` layout
//! `user_key ++ (sequence << 8 | entry_type)`.

use std::cmp::Ordering;

/// Sequence numbers are bounded by `2^56 - 1` (`spec.md §3`).
pub const MAX_SEQUENCE_NUMBER: u64 = (1u64 << 56) - 1;

pub type SequenceNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntryType {
    Deletion = 0,
    Value = 1,
}

impl EntryType {
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Deletion),
            1 => Some(Self::Value),
            _ => None,
        }
    }
}

/// Fixed 12-byte locator into the value log (`spec.md §3`): `offset: u64, size: u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLocator {
    pub offset: u64,
    pub size: u32,
}

pub const VALUE_LOCATOR_LEN: usize = 12;

impl ValueLocator {
    #[must_use]
    pub fn encode(&self) -> [u8; VALUE_LOCATOR_LEN] {
        let mut buf = [0u8; VALUE_LOCATOR_LEN];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != VALUE_LOCATOR_LEN {
            return None;
        }
        let offset = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        let size = u32::from_le_bytes(bytes[8..].try_into().ok()?);
        Some(Self { offset, size })
    }
}

/// Pack `(sequence, entry_type)` into the 8-byte tag appended to an internal key.
#[must_use]
pub fn pack_tag(sequence: SequenceNumber, kind: EntryType) -> u64 {
    (sequence << 8) | kind as u64
}

#[must_use]
pub fn unpack_tag(tag: u64) -> (SequenceNumber, Option<EntryType>) {
    (tag >> 8, EntryType::from_u8((tag & 0xff) as u8))
}

/// Appends the 8-byte tag to `user_key`, producing an encoded internal key.
#[must_use]
pub fn append_internal_key(user_key: &[u8], sequence: SequenceNumber, kind: EntryType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + 8);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_tag(sequence, kind).to_le_bytes());
    buf
}

/// Splits an encoded internal key into its user-key slice and its parsed tag.
///
/// Returns `None` if `encoded` is shorter than 8 bytes or the low tag byte is not a valid
/// [`EntryType`] (both are treated as corruption by callers).
#[must_use]
pub fn split_internal_key(encoded: &[u8]) -> Option<(&[u8], SequenceNumber, EntryType)> {
    let split_at = encoded.len().checked_sub(8)?;
    let (user_key, tag_bytes) = encoded.split_at(split_at);
    let tag = u64::from_le_bytes(tag_bytes.try_into().ok()?);
    let (sequence, kind) = unpack_tag(tag);
    Some((user_key, sequence, kind?))
}

/// Compares two encoded internal keys: user key ascending (via `user_cmp`), then the raw
/// 8-byte tag descending. Since `tag = sequence << 8 | entry_type`, this sorts by sequence
/// descending first and falls back to entry type only for the (practically impossible) case
/// of two entries for the same user key sharing a sequence number.
#[must_use]
pub fn compare_internal_keys(
    a: &[u8],
    b: &[u8],
    user_cmp: &dyn Fn(&[u8], &[u8]) -> Ordering,
) -> Ordering {
    let split_at_a = a.len() - 8;
    let split_at_b = b.len() - 8;
    let (a_user, a_tag) = a.split_at(split_at_a);
    let (b_user, b_tag) = b.split_at(split_at_b);
    let a_tag = u64::from_le_bytes(a_tag.try_into().expect("8-byte tag"));
    let b_tag = u64::from_le_bytes(b_tag.try_into().expect("8-byte tag"));
    user_cmp(a_user, b_user).then_with(|| b_tag.cmp(&a_tag))
}

/// A `LookupKey`: the encoded form used to seek a memtable or table for the newest visible
/// record of `user_key` as of `snapshot`, i.e. `user_key ++ (snapshot << 8 | Value)`. Because
/// internal keys with the same user key sort by descending sequence, seeking this key lands
/// exactly on the newest entry with `sequence <= snapshot`.
#[must_use]
pub fn lookup_key(user_key: &[u8], snapshot: SequenceNumber) -> Vec<u8> {
    append_internal_key(user_key, snapshot, EntryType::Value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytewise(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let encoded = append_internal_key(b"hello", 42, EntryType::Value);
        let (user_key, seq, kind) = split_internal_key(&encoded).unwrap();
        assert_eq!(user_key, b"hello");
        assert_eq!(seq, 42);
        assert_eq!(kind, EntryType::Value);
    }

    #[test]
    fn newer_sequence_sorts_first_for_equal_user_key() {
        let newer = append_internal_key(b"k", 10, EntryType::Value);
        let older = append_internal_key(b"k", 5, EntryType::Value);
        assert_eq!(compare_internal_keys(&newer, &older, &bytewise), Ordering::Less);
    }

    #[test]
    fn user_key_dominates_ordering() {
        let a = append_internal_key(b"a", 100, EntryType::Value);
        let b = append_internal_key(b"b", 1, EntryType::Value);
        assert_eq!(compare_internal_keys(&a, &b, &bytewise), Ordering::Less);
    }

    #[test]
    fn value_locator_round_trips() {
        let locator = ValueLocator { offset: 123_456, size: 789 };
        let encoded = locator.encode();
        assert_eq!(ValueLocator::decode(&encoded), Some(locator));
    }
}
