use crate::constants::{CHUNK_FOOTER_SIZE, CHUNK_HASH_SIZE};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

bitflags! {
    pub struct FooterFlags: u8 {
        const IS_COMPLETED = 0x1;
        const IS_MAP_12_BYTES = 0x2;
    }
}

/// On-disk footer of a completed chunk file. Absent (or zeroed) for an
/// ongoing chunk, meaningful in every field once `is_completed` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFooter {
    pub is_completed: bool,
    pub is_map_12_bytes: bool,
    pub actual_data_size: i32,
    pub physical_data_size: i32,
    pub map_size: i32,
    pub checksum: [u8; CHUNK_HASH_SIZE],
}

impl ChunkFooter {
    pub fn completed(actual_data_size: i32, checksum: [u8; CHUNK_HASH_SIZE]) -> Self {
        Self {
            is_completed: true,
            is_map_12_bytes: true,
            actual_data_size,
            physical_data_size: actual_data_size,
            map_size: 0,
            checksum,
        }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        let start = buf.len();
        let mut flags = FooterFlags::empty();

        if self.is_completed {
            flags |= FooterFlags::IS_COMPLETED;
        }

        if self.is_map_12_bytes {
            flags |= FooterFlags::IS_MAP_12_BYTES;
        }

        buf.put_u8(flags.bits());
        buf.put_i32_le(self.actual_data_size);
        buf.put_i32_le(self.physical_data_size);
        buf.put_i32_le(self.map_size);

        let written = buf.len() - start;
        let padding = CHUNK_FOOTER_SIZE - written - CHUNK_HASH_SIZE;
        buf.put_bytes(0, padding);
        buf.put_slice(&self.checksum);
    }

    /// Returns `None` for an ongoing (not-yet-sealed) chunk, or for a
    /// trailing region whose flags byte doesn't decode to any known flag.
    pub fn get(mut buf: Bytes) -> Option<Self> {
        let flags = FooterFlags::from_bits(buf.get_u8())?;

        if !flags.contains(FooterFlags::IS_COMPLETED) {
            return None;
        }

        let is_map_12_bytes = flags.contains(FooterFlags::IS_MAP_12_BYTES);
        let actual_data_size = buf.get_i32_le();
        let physical_data_size = buf.get_i32_le();
        let map_size = buf.get_i32_le();

        buf.advance(buf.remaining() - CHUNK_HASH_SIZE);
        let mut checksum = [0u8; CHUNK_HASH_SIZE];
        buf.copy_to_slice(&mut checksum);

        Some(Self {
            is_completed: true,
            is_map_12_bytes,
            actual_data_size,
            physical_data_size,
            map_size,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrips() {
        let footer = ChunkFooter::completed(512, [7u8; CHUNK_HASH_SIZE]);
        let mut buf = BytesMut::new();
        footer.put(&mut buf);
        assert_eq!(buf.len(), CHUNK_FOOTER_SIZE);

        let parsed = ChunkFooter::get(buf.freeze()).expect("completed footer");
        assert_eq!(parsed, footer);
    }

    #[test]
    fn incomplete_footer_parses_to_none() {
        let mut buf = BytesMut::new();
        buf.put_bytes(0, CHUNK_FOOTER_SIZE);
        assert!(ChunkFooter::get(buf.freeze()).is_none());
    }

    #[test]
    fn garbage_flags_byte_parses_to_none_instead_of_panicking() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xff);
        buf.put_bytes(0, CHUNK_FOOTER_SIZE - 1);
        assert!(ChunkFooter::get(buf.freeze()).is_none());
    }
}
