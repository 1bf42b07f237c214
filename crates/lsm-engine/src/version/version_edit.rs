//! A `VersionEdit`: a delta applied to a [`Version`](super::Version) to produce the next one,
//! and the unit of record logged to the `MANIFEST` (`spec.md §4.6`).

use integer_encoding::{VarInt, VarIntWriter as _};

use crate::error::{Result, Status};
use crate::format::SequenceNumber;

use super::file_metadata::FileMetadata;

#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(u8, Vec<u8>)>,
    pub deleted_files: Vec<(u8, u64)>,
    pub new_files: Vec<(u8, FileMetadata)>,
}

impl VersionEdit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_number(&mut self, n: u64) {
        self.log_number = Some(n);
    }

    pub fn set_prev_log_number(&mut self, n: u64) {
        self.prev_log_number = Some(n);
    }

    pub fn set_next_file_number(&mut self, n: u64) {
        self.next_file_number = Some(n);
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    pub fn add_file(&mut self, level: u8, meta: FileMetadata) {
        self.new_files.push((level, meta));
    }

    pub fn delete_file(&mut self, level: u8, file_number: u64) {
        self.deleted_files.push((level, file_number));
    }

    pub fn set_compact_pointer(&mut self, level: u8, key: Vec<u8>) {
        self.compact_pointers.push((level, key));
    }

    /// Tag bytes identifying each field in the encoded form, loosely following LevelDB's
    /// `VersionEdit::EncodeTo` tag scheme.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        if let Some(name) = &self.comparator_name {
            out.push(1);
            write_bytes(&mut out, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            out.push(2);
            write_u64(&mut out, n);
        }
        if let Some(n) = self.prev_log_number {
            out.push(3);
            write_u64(&mut out, n);
        }
        if let Some(n) = self.next_file_number {
            out.push(4);
            write_u64(&mut out, n);
        }
        if let Some(seq) = self.last_sequence {
            out.push(5);
            write_u64(&mut out, seq);
        }
        for (level, key) in &self.compact_pointers {
            out.push(6);
            out.push(*level);
            write_bytes(&mut out, key);
        }
        for (level, number) in &self.deleted_files {
            out.push(7);
            out.push(*level);
            write_u64(&mut out, *number);
        }
        for (level, meta) in &self.new_files {
            out.push(8);
            out.push(*level);
            write_u64(&mut out, meta.file_number);
            write_u64(&mut out, meta.file_size);
            write_bytes(&mut out, &meta.smallest);
            write_bytes(&mut out, &meta.largest);
        }

        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut edit = Self::new();
        let mut cursor = bytes;

        while let Some((&tag, rest)) = cursor.split_first() {
            cursor = rest;
            match tag {
                1 => {
                    let (s, rest) = read_bytes(cursor)?;
                    edit.comparator_name = Some(String::from_utf8_lossy(s).into_owned());
                    cursor = rest;
                }
                2 => {
                    let (n, rest) = read_u64(cursor)?;
                    edit.log_number = Some(n);
                    cursor = rest;
                }
                3 => {
                    let (n, rest) = read_u64(cursor)?;
                    edit.prev_log_number = Some(n);
                    cursor = rest;
                }
                4 => {
                    let (n, rest) = read_u64(cursor)?;
                    edit.next_file_number = Some(n);
                    cursor = rest;
                }
                5 => {
                    let (n, rest) = read_u64(cursor)?;
                    edit.last_sequence = Some(n);
                    cursor = rest;
                }
                6 => {
                    let (level, rest) = read_u8(cursor)?;
                    let (key, rest) = read_bytes(rest)?;
                    edit.compact_pointers.push((level, key.to_vec()));
                    cursor = rest;
                }
                7 => {
                    let (level, rest) = read_u8(cursor)?;
                    let (number, rest) = read_u64(rest)?;
                    edit.deleted_files.push((level, number));
                    cursor = rest;
                }
                8 => {
                    let (level, rest) = read_u8(cursor)?;
                    let (file_number, rest) = read_u64(rest)?;
                    let (file_size, rest) = read_u64(rest)?;
                    let (smallest, rest) = read_bytes(rest)?;
                    let (largest, rest) = read_bytes(rest)?;
                    edit.new_files.push((
                        level,
                        FileMetadata::new(file_number, file_size, smallest.to_vec(), largest.to_vec()),
                    ));
                    cursor = rest;
                }
                other => return Err(Status::corruption(format!("unknown version-edit tag {other}"))),
            }
        }

        Ok(edit)
    }
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.write_varint(value).expect("Vec<u8> write cannot fail");
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.write_varint(bytes.len() as u64).expect("Vec<u8> write cannot fail");
    out.extend_from_slice(bytes);
}

fn read_u8(bytes: &[u8]) -> Result<(u8, &[u8])> {
    bytes
        .split_first()
        .map(|(&b, rest)| (b, rest))
        .ok_or_else(|| Status::corruption("truncated version edit"))
}

fn read_u64(bytes: &[u8]) -> Result<(u64, &[u8])> {
    let (value, used) = u64::decode_var(bytes).ok_or_else(|| Status::corruption("bad varint in version edit"))?;
    Ok((value, &bytes[used..]))
}

fn read_bytes(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_u64(bytes)?;
    let len = len as usize;
    if rest.len() < len {
        return Err(Status::corruption("truncated length-prefixed field in version edit"));
    }
    Ok(rest.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mut edit = VersionEdit::new();
        edit.set_log_number(7);
        edit.set_last_sequence(42);
        edit.add_file(0, FileMetadata::new(3, 1024, b"aaa".to_vec(), b"zzz".to_vec()));
        edit.delete_file(1, 9);
        edit.set_compact_pointer(2, b"ppp".to_vec());

        let encoded = edit.encode();
        let decoded = VersionEdit::decode(&encoded).unwrap();

        assert_eq!(decoded.log_number, Some(7));
        assert_eq!(decoded.last_sequence, Some(42));
        assert_eq!(decoded.new_files.len(), 1);
        assert_eq!(decoded.new_files[0].1.file_number, 3);
        assert_eq!(decoded.deleted_files, vec![(1, 9)]);
        assert_eq!(decoded.compact_pointers, vec![(2, b"ppp".to_vec())]);
    }
}
