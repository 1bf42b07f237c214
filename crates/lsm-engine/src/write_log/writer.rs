use std::fmt::{self, Debug, Formatter};
use std::io::Error as IoError;

use lsm_vfs::WritableFile;
use thiserror::Error;

use super::{mask_checksum, RecordType, HEADER_SIZE, WRITE_LOG_BLOCK_SIZE};

/// Writes length-framed, checksummed, block-chunked physical records to a [`WritableFile`],
/// grounded on the teacher's `write_log::writer::WriteLogWriter`.
pub struct WriteLogWriter<File> {
    file: File,
    type_checksums: [u32; RecordType::ALL.len()],
    /// Space remaining in the current 32KB block, in `0..=WRITE_LOG_BLOCK_SIZE`.
    remaining_space: usize,
}

impl<File: WritableFile> WriteLogWriter<File> {
    #[must_use]
    pub fn new(file: File) -> Self {
        let type_checksums = RecordType::ALL.map(|t| crc32c::crc32c(&[t as u8]));
        Self { file, type_checksums, remaining_space: WRITE_LOG_BLOCK_SIZE }
    }

    /// Resumes writing at `offset` bytes into an existing log, used when reopening a MANIFEST
    /// for append (`spec.md §4.4`).
    #[must_use]
    pub fn new_with_offset(file: File, offset: u64) -> Self {
        let offset_into_block = (offset % WRITE_LOG_BLOCK_SIZE as u64) as usize;
        let remaining_space = WRITE_LOG_BLOCK_SIZE - offset_into_block;
        let type_checksums = RecordType::ALL.map(|t| crc32c::crc32c(&[t as u8]));
        Self { file, type_checksums, remaining_space }
    }

    pub fn sync(&mut self) -> Result<(), IoError> {
        self.file.sync_data().map_err(|err| IoError::other(err.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> File {
        self.file
    }

    /// Writes one logical record, fragmenting across blocks as needed. A failure here is
    /// treated as fatal for further writes to this log, since a partially-written record
    /// cannot be retracted (the caller must close and recover).
    pub fn add_record(&mut self, record: &[u8]) -> Result<(), LogWriteError> {
        let result = self.inner_add_record(record);
        let flush_result = self.file.flush();
        result.or(flush_result).map_err(LogWriteError)
    }

    fn inner_add_record(&mut self, mut record: &[u8]) -> Result<(), IoError> {
        let mut first_physical = true;
        let zero_trailer = [0u8; HEADER_SIZE - 1];

        while !record.is_empty() || first_physical {
            if let Some(trailer) = zero_trailer.get(..self.remaining_space) {
                self.file.write_all(trailer)?;
                self.remaining_space = WRITE_LOG_BLOCK_SIZE;
            }

            let fragment_len = record.len().min(self.remaining_space - HEADER_SIZE);
            let last_physical = fragment_len == record.len();

            let record_type = match (first_physical, last_physical) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, false) => RecordType::Middle,
                (false, true) => RecordType::Last,
            };

            let (fragment, rest) = record.split_at(fragment_len);
            let checksum = crc32c::crc32c_append(self.type_checksums[record_type as usize], fragment);
            let masked = mask_checksum(checksum);
            let fragment_len_u16 = fragment_len as u16;

            self.file.write_all(&masked.to_le_bytes())?;
            self.file.write_all(&fragment_len_u16.to_le_bytes())?;
            self.file.write_all(&[record_type as u8])?;
            self.file.write_all(fragment)?;

            record = rest;
            first_physical = false;
            self.remaining_space -= HEADER_SIZE + fragment_len;
        }
        Ok(())
    }
}

impl<File> Debug for WriteLogWriter<File> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLogWriter")
            .field("remaining_space", &self.remaining_space)
            .finish_non_exhaustive()
    }
}

/// A write log could not be written to. Fatal for writes to the affected log; the database
/// must be closed and recovered before accepting further writes to it.
#[derive(Error, Debug)]
#[error("fatal error writing log record: {0}")]
pub struct LogWriteError(pub IoError);
