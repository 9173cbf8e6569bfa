use crate::constants::CHUNK_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// On-disk header of a chunk file. Declares the chunk's logical body
/// capacity and the `[start, end]` range of chunk-numbers it covers —
/// `end > start` only for a scavenged, merged chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub version: u8,
    pub chunk_size: usize,
    pub chunk_start_number: usize,
    pub chunk_end_number: usize,
    pub is_scavenged: bool,
    pub chunk_id: Uuid,
}

impl ChunkHeader {
    pub fn new(start: usize, end: usize, chunk_size: usize) -> Self {
        Self {
            version: 0,
            chunk_size,
            chunk_start_number: start,
            chunk_end_number: end,
            is_scavenged: false,
            chunk_id: Uuid::new_v4(),
        }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u8(self.version);
        buf.put_u32_le(self.chunk_size as u32);
        buf.put_u32_le(self.chunk_start_number as u32);
        buf.put_u32_le(self.chunk_end_number as u32);
        buf.put_u8(self.is_scavenged as u8);
        buf.put_u128_le(self.chunk_id.as_u128());

        let written = buf.len() - start;
        buf.put_bytes(0, CHUNK_HEADER_SIZE - written);
    }

    pub fn get(mut buf: Bytes) -> Self {
        let version = buf.get_u8();
        let chunk_size = buf.get_u32_le() as usize;
        let chunk_start_number = buf.get_u32_le() as usize;
        let chunk_end_number = buf.get_u32_le() as usize;
        let is_scavenged = buf.get_u8() != 0;
        let chunk_id = Uuid::from_u128(buf.get_u128_le());

        Self {
            version,
            chunk_size,
            chunk_start_number,
            chunk_end_number,
            is_scavenged,
            chunk_id,
        }
    }
}
