use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use tfdb_common::{EventRecord, Position, StreamId};
use uuid::Uuid;

/// Size of the fixed framing wrapped around every record body: a leading
/// length prefix followed by a trailing copy of the same length, so a
/// backward reader can step over a record without an index.
const FRAME_PREFIX_SIZE: usize = std::mem::size_of::<u32>();
const FRAME_SUFFIX_SIZE: usize = std::mem::size_of::<u32>();

/// Wraps `body` in the log's record frame: `[len][body][len]`.
pub fn frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_PREFIX_SIZE + body.len() + FRAME_SUFFIX_SIZE);
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body);
    buf.put_u32_le(body.len() as u32);
    buf.freeze()
}

/// Total on-disk size of a framed record carrying a body of `body_len` bytes.
pub fn framed_size(body_len: usize) -> usize {
    FRAME_PREFIX_SIZE + body_len + FRAME_SUFFIX_SIZE
}

/// Reads the body length out of a frame's leading prefix, given the first
/// `FRAME_PREFIX_SIZE` bytes of the frame.
pub fn read_prefix_len(prefix: &[u8]) -> u32 {
    let mut buf = Bytes::copy_from_slice(prefix);
    buf.get_u32_le()
}

pub fn prefix_size() -> usize {
    FRAME_PREFIX_SIZE
}

fn put_string(src: &str, buf: &mut BytesMut) {
    let mut value = src.len() as u64;

    while value > 0x7F {
        buf.put_u8((value | 0x80) as u8);
        value >>= 7;
    }

    buf.put_u8(value as u8);
    buf.extend_from_slice(src.as_bytes());
}

fn get_string(buf: &mut Bytes) -> String {
    let mut len = 0u32;
    let mut shift = 0u8;

    loop {
        let current = buf.get_u8();
        len |= ((current & 0x7F) as u32) << shift;

        if (current & 0x80) == 0 {
            break;
        }

        shift += 7;
    }

    String::from_utf8(buf.copy_to_bytes(len as usize).to_vec()).expect("utf8 event payload")
}

/// Encodes a committed event's body (everything after the frame): stream
/// id, event number, position, type, data and metadata, each
/// length-prefixed.
pub fn encode_event_body(record: &EventRecord) -> Bytes {
    let mut buf = BytesMut::new();

    buf.put_u128_le(record.id.as_u128());
    put_string(record.stream_id.as_str(), &mut buf);
    buf.put_u64_le(record.event_number);
    buf.put_i64_le(record.position.commit);
    buf.put_i64_le(record.position.prepare);
    put_string(&record.event_type, &mut buf);
    buf.put_i64_le(record.created.timestamp_millis());
    buf.put_u32_le(record.data.len() as u32);
    buf.put_slice(&record.data);
    buf.put_u32_le(record.metadata.len() as u32);
    buf.put_slice(&record.metadata);

    buf.freeze()
}

pub fn decode_event_body(mut buf: Bytes) -> EventRecord {
    let id = Uuid::from_u128(buf.get_u128_le());
    let stream_id = StreamId::new(get_string(&mut buf));
    let event_number = buf.get_u64_le();
    let commit = buf.get_i64_le();
    let prepare = buf.get_i64_le();
    let event_type = get_string(&mut buf);
    let created_millis = buf.get_i64_le();
    let data_len = buf.get_u32_le() as usize;
    let data = buf.copy_to_bytes(data_len);
    let metadata_len = buf.get_u32_le() as usize;
    let metadata = buf.copy_to_bytes(metadata_len);

    EventRecord {
        id,
        stream_id,
        event_number,
        position: Position {
            commit,
            prepare,
        },
        event_type,
        data,
        metadata,
        created: millis_to_datetime(created_millis),
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}
