use std::fmt::{self, Debug, Formatter};
use std::io::{ErrorKind, Read};

use thiserror::Error;

use super::{unmask_checksum, RecordType, HEADER_SIZE, WRITE_LOG_BLOCK_SIZE};

/// Reads physical records written by [`WriteLogWriter`](super::WriteLogWriter), reassembling
/// fragmented logical records.
///
/// Unlike the teacher's reader, which borrows each returned record from an internal block
/// buffer via a lifetime-extending unsafe block, this reader returns an owned `Vec<u8>` per
/// logical record. That costs one extra copy per record but keeps the whole write_log module
/// free of `unsafe`, which is worth it outside of a single hot allocation on the read path.
pub struct WriteLogReader<File> {
    file: File,
    block_buffer: Vec<u8>,
    offset_in_block: usize,
    block_len: usize,
    next_record_offset: u64,
    eof: bool,
}

impl<File: Read> WriteLogReader<File> {
    #[must_use]
    pub fn new(file: File) -> Self {
        let mut this = Self {
            file,
            block_buffer: vec![0u8; WRITE_LOG_BLOCK_SIZE],
            offset_in_block: 0,
            block_len: 0,
            next_record_offset: 0,
            eof: false,
        };
        this.refill_block();
        this
    }

    /// Reads the next logical record, skipping over any corrupt physical records along the
    /// way (corruption is reported to `on_error` rather than treated as fatal, since a
    /// truncated tail record is an expected consequence of an unclean shutdown). Returns
    /// `None` at end of file.
    pub fn read_record(
        &mut self,
        mut on_error: impl FnMut(LogReadError),
    ) -> Option<Vec<u8>> {
        let mut record_buffer: Vec<u8> = Vec::new();
        let mut fragmented = false;

        loop {
            match self.read_physical_record() {
                PhysicalRecord::Record(record_type, fragment) => match record_type {
                    RecordType::Full => {
                        if fragmented && !record_buffer.is_empty() {
                            on_error(LogReadError::FullInFragmentedRecord);
                        }
                        return Some(fragment.to_vec());
                    }
                    RecordType::First => {
                        if fragmented && !record_buffer.is_empty() {
                            on_error(LogReadError::PartialRecordWithoutEnd);
                        }
                        record_buffer.clear();
                        record_buffer.extend_from_slice(fragment);
                        fragmented = true;
                    }
                    RecordType::Middle => {
                        if fragmented {
                            record_buffer.extend_from_slice(fragment);
                        } else {
                            on_error(LogReadError::MissingStartOfFragmentedRecord);
                        }
                    }
                    RecordType::Last => {
                        if fragmented {
                            record_buffer.extend_from_slice(fragment);
                            return Some(std::mem::take(&mut record_buffer));
                        }
                        on_error(LogReadError::MissingStartOfFragmentedRecord);
                    }
                    RecordType::Zero => {
                        // Padding left by the writer at the end of a block; not an error.
                    }
                },
                PhysicalRecord::Eof => {
                    if fragmented && !record_buffer.is_empty() {
                        on_error(LogReadError::PartialRecordWithoutEnd);
                    }
                    return None;
                }
                PhysicalRecord::BadChecksum(len) => {
                    on_error(LogReadError::ChecksumMismatch);
                    fragmented = false;
                    record_buffer.clear();
                    let _ = len;
                }
            }
        }
    }

    fn refill_block(&mut self) {
        let mut filled = 0;
        loop {
            match self.file.read(&mut self.block_buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
            if filled == self.block_buffer.len() {
                break;
            }
        }
        self.block_len = filled;
        self.offset_in_block = 0;
        self.eof = filled == 0;
    }

    fn read_physical_record(&mut self) -> PhysicalRecord<'_> {
        loop {
            if self.block_len - self.offset_in_block < HEADER_SIZE {
                if self.eof {
                    return PhysicalRecord::Eof;
                }
                self.next_record_offset += (self.block_len - self.offset_in_block) as u64;
                self.refill_block();
                if self.block_len == 0 {
                    return PhysicalRecord::Eof;
                }
                continue;
            }

            let header_start = self.offset_in_block;
            let header = &self.block_buffer[header_start..header_start + HEADER_SIZE];
            let masked_checksum = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let length = u16::from_le_bytes(header[4..6].try_into().unwrap()) as usize;
            let record_type = header[6];

            let data_start = header_start + HEADER_SIZE;
            if data_start + length > self.block_len {
                // Truncated tail record from an unclean shutdown; treat the rest of the
                // block as consumed.
                self.next_record_offset += (self.block_len - self.offset_in_block) as u64;
                self.offset_in_block = self.block_len;
                return PhysicalRecord::BadChecksum(length);
            }

            let fragment_range = data_start..data_start + length;
            let consumed = HEADER_SIZE + length;
            self.offset_in_block += consumed;
            self.next_record_offset += consumed as u64;

            let Some(record_type) = RecordType::from_u8(record_type) else {
                return PhysicalRecord::BadChecksum(length);
            };

            let expected = unmask_checksum(masked_checksum);
            let actual = crc32c::crc32c_append(
                crc32c::crc32c(&[record_type as u8]),
                &self.block_buffer[fragment_range.clone()],
            );
            if record_type != RecordType::Zero && actual != expected {
                return PhysicalRecord::BadChecksum(length);
            }

            return PhysicalRecord::Record(record_type, &self.block_buffer[fragment_range]);
        }
    }
}

enum PhysicalRecord<'a> {
    Record(RecordType, &'a [u8]),
    BadChecksum(usize),
    Eof,
}

impl<File> Debug for WriteLogReader<File> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLogReader")
            .field("next_record_offset", &self.next_record_offset)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LogReadError {
    #[error("checksum mismatch or truncated physical record")]
    ChecksumMismatch,
    #[error("Full record type seen in the middle of a fragmented record")]
    FullInFragmentedRecord,
    #[error("fragmented record ended without a Last fragment")]
    PartialRecordWithoutEnd,
    #[error("Middle or Last fragment seen without a preceding First")]
    MissingStartOfFragmentedRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write_log::WriteLogWriter;
    use std::io::Cursor;

    #[derive(Default)]
    struct VecFile(Vec<u8>);
    impl std::io::Write for VecFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl lsm_vfs::WritableFile for VecFile {
        fn sync_data(&mut self) -> lsm_vfs::FsResult<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trips_small_records() {
        let mut writer = WriteLogWriter::new(VecFile::default());
        writer.add_record(b"hello").unwrap();
        writer.add_record(b"world!!").unwrap();
        let bytes = writer.into_inner().0;

        let mut reader = WriteLogReader::new(Cursor::new(bytes));
        let mut errors = Vec::new();
        let first = reader.read_record(|e| errors.push(e)).unwrap();
        let second = reader.read_record(|e| errors.push(e)).unwrap();
        assert!(reader.read_record(|e| errors.push(e)).is_none());

        assert_eq!(first, b"hello");
        assert_eq!(second, b"world!!");
        assert!(errors.is_empty());
    }

    #[test]
    fn round_trips_record_spanning_multiple_blocks() {
        let mut writer = WriteLogWriter::new(VecFile::default());
        let big = vec![0xabu8; WRITE_LOG_BLOCK_SIZE * 3];
        writer.add_record(&big).unwrap();
        let bytes = writer.into_inner().0;

        let mut reader = WriteLogReader::new(Cursor::new(bytes));
        let mut errors = Vec::new();
        let record = reader.read_record(|e| errors.push(e)).unwrap();
        assert_eq!(record, big);
        assert!(errors.is_empty());
    }

    #[test]
    fn empty_record_round_trips() {
        let mut writer = WriteLogWriter::new(VecFile::default());
        writer.add_record(&[]).unwrap();
        let bytes = writer.into_inner().0;

        let mut reader = WriteLogReader::new(Cursor::new(bytes));
        let mut errors = Vec::new();
        let record = reader.read_record(|e| errors.push(e)).unwrap();
        assert!(record.is_empty());
    }
}
