//! The fixed-size trailer at the end of every `.ldb` file: two block handles plus a magic
//! number, grounded on classical LevelDB's `Footer`/`BlockHandle` and the teacher's
//! `table_file` module's use of them.

use integer_encoding::{VarInt, VarIntWriter as _};

use crate::error::{Result, Status};

/// `8 + 8` max varint bytes per handle, times two handles, rounded up; the footer is always
/// exactly this many bytes on disk (shorter encodings are padded).
pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

const TABLE_MAGIC: u64 = 0xdb47_1987_4b4f_4f4f;

/// Offset and size of one block within a `.ldb` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    const MAX_ENCODED_LENGTH: usize = 10 + 10;

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.write_varint(self.offset).expect("Vec<u8> write cannot fail");
        out.write_varint(self.size).expect("Vec<u8> write cannot fail");
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let (offset, used) = u64::decode_var(bytes).ok_or_else(|| Status::corruption("bad block handle offset"))?;
        let rest = &bytes[used..];
        let (size, used) = u64::decode_var(rest).ok_or_else(|| Status::corruption("bad block handle size"))?;
        Ok((Self { offset, size }, &rest[used..]))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    #[must_use]
    pub fn encode(&self) -> [u8; ENCODED_LENGTH] {
        let mut buf = Vec::with_capacity(ENCODED_LENGTH);
        self.metaindex_handle.encode_into(&mut buf);
        self.index_handle.encode_into(&mut buf);
        buf.resize(ENCODED_LENGTH - 8, 0);
        buf.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        buf.try_into().expect("buffer sized to ENCODED_LENGTH exactly")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCODED_LENGTH {
            return Err(Status::corruption("table footer has the wrong length"));
        }
        let magic = u64::from_le_bytes(bytes[ENCODED_LENGTH - 8..].try_into().unwrap());
        if magic != TABLE_MAGIC {
            return Err(Status::corruption("table footer has the wrong magic number"));
        }
        let (metaindex_handle, rest) = BlockHandle::decode(bytes)?;
        let (index_handle, _rest) = BlockHandle::decode(rest)?;
        Ok(Self { metaindex_handle, index_handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_round_trips_through_encode_decode() {
        let footer = Footer {
            metaindex_handle: BlockHandle { offset: 10, size: 20 },
            index_handle: BlockHandle { offset: 40, size: 80 },
        };
        let decoded = Footer::decode(&footer.encode()).unwrap();
        assert_eq!(decoded.metaindex_handle, footer.metaindex_handle);
        assert_eq!(decoded.index_handle, footer.index_handle);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = Footer::default().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(Footer::decode(&bytes).is_err());
    }
}
