//! The external value log (`spec.md §4.5`), grounded on `original_source/koo/Vlog.h`'s
//! "very simple implementation of WiscKey's Value Log": an append-only file storing
//! `[key_len][value_len][key][value]` records, addressed by the byte offset of the value
//! field so that a [`ValueLocator`](crate::format::ValueLocator) needs no key length at read
//! time.
//!
//! `add_record` reserves its byte range with one atomic fetch-add on the backing
//! [`ConcurrentWritableFile`] (the "atomic cursor" the original serializes flush around with a
//! spin lock); this workspace has no separate in-memory staging buffer to flush, since
//! `ConcurrentWritableFile::write_at` writes its range directly, so there is nothing analogous
//! to the original's spin-locked `Flush` to reproduce.

use integer_encoding::{VarInt, VarIntWriter as _};
use lsm_vfs::{ConcurrentWritableFile, Env, RandomAccessFile};

use crate::error::{Result, Status};
use crate::format::ValueLocator;

/// The value log: one append-only file per database, opened once at startup.
///
/// Mirrors `Vlog.h` holding separate `writer`/`reader` handles onto the same file rather than
/// one handle doing both: `W` is the atomic-cursor appender, `R` a random-access handle used
/// purely for reads.
pub struct ValueLog<W, R> {
    writer: W,
    reader: R,
}

impl<W: ConcurrentWritableFile, R: RandomAccessFile> ValueLog<W, R> {
    #[must_use]
    pub fn new(writer: W, reader: R) -> Self {
        Self { writer, reader }
    }

    pub fn open<E>(env: &E, path: &std::path::Path) -> Result<Self>
    where
        E: Env<ConcurrentWritableFile = W, RandomAccessFile = R>,
    {
        let writer = env.new_concurrent_writable_file(path)?;
        let reader = env.new_random_access_file(path)?;
        Ok(Self::new(writer, reader))
    }

    /// Appends `key ++ value`, framed as `[key_len:varint][value_len:varint][key][value]`, and
    /// returns the locator of the value field, per `spec.md §4.5`: "returns `offset` = position
    /// of the value field".
    pub fn add_record(&self, key: &[u8], value: &[u8]) -> Result<ValueLocator> {
        let mut framed = Vec::with_capacity(key.len() + value.len() + 10);
        framed.write_varint(key.len() as u64).expect("Vec<u8> write cannot fail");
        framed.write_varint(value.len() as u64).expect("Vec<u8> write cannot fail");
        framed.extend_from_slice(key);
        let value_offset_in_frame = framed.len();
        framed.extend_from_slice(value);

        let start = self.writer.reserve(framed.len() as u64)?;
        self.writer.write_at(start, &framed)?;

        Ok(ValueLocator {
            offset: start + value_offset_in_frame as u64,
            size: value.len() as u32,
        })
    }

    /// Reads the `size` bytes at `offset`. Per `spec.md §4.5`/`§7`, a short read always
    /// surfaces as an I/O error: a crash before a record's bytes reached disk means the WAL
    /// should never have recorded its locator in the first place, so this can only happen
    /// under filesystem corruption.
    pub fn read_record(&self, locator: ValueLocator) -> Result<Vec<u8>> {
        let bytes = self.reader.read_at(locator.offset, locator.size as usize)?;
        if bytes.len() != locator.size as usize {
            return Err(Status::io_error("short read from value log"));
        }
        Ok(bytes)
    }

    pub fn sync(&self) -> Result<()> {
        self.writer.sync()?;
        Ok(())
    }

    #[must_use]
    pub fn logical_len(&self) -> u64 {
        self.writer.logical_len()
    }
}

/// Decodes one `[key_len][value_len][key][value]` record starting at `frame_start` within
/// `bytes`, used when replaying the value log during a scan-based recovery (`spec.md §4.5`'s
/// value-log framing makes this possible without consulting the LSM).
#[must_use]
pub fn decode_record(bytes: &[u8]) -> Option<(&[u8], &[u8], usize)> {
    let (key_len, used1) = u64::decode_var(bytes)?;
    let rest = &bytes[used1..];
    let (value_len, used2) = u64::decode_var(rest)?;
    let rest = &rest[used2..];

    let key_len = key_len as usize;
    let value_len = value_len as usize;
    if rest.len() < key_len + value_len {
        return None;
    }
    let (key, rest) = rest.split_at(key_len);
    let (value, _) = rest.split_at(value_len);
    let total_len = used1 + used2 + key_len + value_len;
    Some((key, value, total_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsm_vfs::MemEnv;
    use std::path::Path;

    #[test]
    fn add_then_read_record_round_trips() {
        let env = MemEnv::new();
        let vlog = ValueLog::open(&env, Path::new("/db/vlog")).unwrap();

        let loc_a = vlog.add_record(b"key-a", b"value-a-contents").unwrap();
        let loc_b = vlog.add_record(b"key-b", b"v2").unwrap();

        assert_eq!(vlog.read_record(loc_a).unwrap(), b"value-a-contents".to_vec());
        assert_eq!(vlog.read_record(loc_b).unwrap(), b"v2".to_vec());
    }

    #[test]
    fn concurrent_appends_claim_disjoint_ranges() {
        let env = MemEnv::new();
        let vlog = ValueLog::open(&env, Path::new("/db/vlog")).unwrap();

        let locators: Vec<ValueLocator> = std::thread::scope(|scope| {
            let vlog = &vlog;
            (0..8)
                .map(|i| scope.spawn(move || vlog.add_record(format!("k{i}").as_bytes(), &[i as u8; 16]).unwrap()))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        for (i, locator) in locators.iter().enumerate() {
            assert_eq!(vlog.read_record(*locator).unwrap(), vec![i as u8; 16]);
        }
    }

    #[test]
    fn short_read_surfaces_as_io_error() {
        let env = MemEnv::new();
        let vlog = ValueLog::open(&env, Path::new("/db/vlog")).unwrap();
        let mut locator = vlog.add_record(b"k", b"short").unwrap();
        locator.size += 100;
        let err = vlog.read_record(locator).unwrap_err();
        assert!(matches!(err.code, crate::error::ErrorCode::IoError));
    }
}
