use crate::db::ChunkDb;
use crate::index::StreamIndex;
use crate::record::{decode_event_body, encode_event_body, frame, prefix_size, read_prefix_len};
use bytes::Bytes;
use chrono::Utc;
use std::sync::RwLock;
use tfdb_common::{
    Direction, EventRecord, Error, ExpectedVersion, Position, ProposedEvent, Result, Revision,
    StreamId, WriteResult, STREAM_CREATED_EVENT_TYPE,
};

/// How far back `ExpectedVersion::Any` idempotency checks look for a
/// matching event id before giving up and treating the write as new.
const RECENT_MATCH_WINDOW: u64 = 8;

/// The log plus the per-stream index rebuilt from it, exposing the
/// expected-version-guarded append surface above raw chunk appends.
pub struct EventStore {
    db: ChunkDb,
    index: RwLock<StreamIndex>,
}

impl EventStore {
    pub fn open(db: ChunkDb) -> Result<Self> {
        let mut index = StreamIndex::new();

        for (position, body) in db.scan_records()? {
            let record = decode_event_body(body);
            debug_assert_eq!(record.position.offset(), position);
            index.append(&record.stream_id, record.event_number, record.position);
        }

        Ok(Self {
            db,
            index: RwLock::new(index),
        })
    }

    pub fn db(&self) -> &ChunkDb {
        &self.db
    }

    pub fn close(&self) -> Result<()> {
        self.db.close()
    }

    fn read_body_at(&self, position: u64) -> Result<Bytes> {
        let prefix = self.db.read_at(position, prefix_size())?;
        let body_len = read_prefix_len(&prefix) as usize;
        self.db.read_at(position + prefix_size() as u64, body_len)
    }

    fn read_event(&self, stream_id: &StreamId, event_number: u64) -> Result<Option<EventRecord>> {
        let position = {
            let index = self.index.read().unwrap();
            index.position_of(stream_id, event_number)
        };

        match position {
            Some(position) => Ok(Some(decode_event_body(self.read_body_at(position.offset())?))),
            None => Ok(None),
        }
    }

    fn last_event_number(&self, stream_id: &StreamId) -> Option<u64> {
        self.index.read().unwrap().last_event_number(stream_id)
    }

    /// True if every event in `proposed` already sits, in order, starting at
    /// `start_number` in the committed log with matching ids.
    fn is_idempotent_replay(
        &self,
        stream_id: &StreamId,
        start_number: u64,
        proposed: &[ProposedEvent],
    ) -> Result<bool> {
        for (offset, event) in proposed.iter().enumerate() {
            match self.read_event(stream_id, start_number + offset as u64)? {
                Some(existing) if existing.id == event.id => continue,
                _ => return Ok(false),
            }
        }

        Ok(true)
    }

    /// For `ExpectedVersion::Any` single-event rewrites: scans a small
    /// recent window of the stream's own history for a matching event id.
    fn find_recent_match(&self, stream_id: &StreamId, event: &ProposedEvent) -> Result<Option<u64>> {
        let Some(current) = self.last_event_number(stream_id) else {
            return Ok(None);
        };

        let floor = current.saturating_sub(RECENT_MATCH_WINDOW);
        let mut number = current;

        loop {
            if let Some(existing) = self.read_event(stream_id, number)? {
                if existing.id == event.id {
                    return Ok(Some(number));
                }
            }

            if number == floor {
                break;
            }

            number -= 1;
        }

        Ok(None)
    }

    fn idempotent_result_at(&self, stream_id: &StreamId, event_number: u64) -> Result<WriteResult> {
        let existing = self
            .read_event(stream_id, event_number)?
            .expect("idempotent match must resolve to a committed event");

        Ok(WriteResult {
            next_expected_version: event_number,
            position: existing.position,
        })
    }

    /// Commits `proposed` as new events, prefixed by an implicit
    /// stream-created event when the stream did not exist before this call.
    fn write_new(
        &self,
        stream_id: &StreamId,
        current: Option<u64>,
        proposed: &[ProposedEvent],
    ) -> Result<WriteResult> {
        if proposed.is_empty() {
            return Err(Error::InvalidOperation(
                "append called with no events".to_string(),
            ));
        }

        let mut next_number = current.map(|n| n + 1).unwrap_or(0);
        let writer_position = self.db.writer_position();
        let mut offset = writer_position;
        let mut frames = Vec::new();
        let mut staged = Vec::new();

        if current.is_none() {
            let (record, body) = build_record(
                stream_id,
                0,
                uuid::Uuid::new_v4(),
                STREAM_CREATED_EVENT_TYPE,
                Bytes::new(),
                Bytes::new(),
                offset,
            );
            offset += body.len() as u64;
            frames.push(body);
            staged.push(record);
            next_number = 1;
        }

        for event in proposed {
            let (record, body) = build_record(
                stream_id,
                next_number,
                event.id,
                &event.event_type,
                event.data.clone(),
                event.metadata.clone(),
                offset,
            );
            offset += body.len() as u64;
            frames.push(body);
            staged.push(record);
            next_number += 1;
        }

        let refs: Vec<&[u8]> = frames.iter().map(|b| b.as_ref()).collect();
        let offsets = self.db.append_batch(&refs)?;

        let mut index = self.index.write().unwrap();
        for (record, actual_offset) in staged.iter().zip(offsets.iter()) {
            debug_assert_eq!(record.position.offset(), *actual_offset);
            index.append(&record.stream_id, record.event_number, record.position);
        }
        drop(index);

        let last = staged.last().unwrap();

        Ok(WriteResult {
            next_expected_version: last.event_number,
            position: last.position,
        })
    }

    /// Appends `proposed` to `stream_id` guarded by `expected`, honoring the
    /// idempotency rules for replayed writes and raising
    /// `WrongExpectedVersion` for genuine conflicts.
    pub fn append(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        proposed: Vec<ProposedEvent>,
    ) -> Result<WriteResult> {
        if proposed.is_empty() {
            return Err(Error::InvalidOperation(
                "append called with no events".to_string(),
            ));
        }

        let current = self.last_event_number(stream_id);

        match expected {
            ExpectedVersion::Any => {
                if proposed.len() == 1 {
                    if let Some(number) = self.find_recent_match(stream_id, &proposed[0])? {
                        return self.idempotent_result_at(stream_id, number);
                    }
                }

                self.write_new(stream_id, current, &proposed)
            }

            ExpectedVersion::StreamExists => {
                if current.is_none() {
                    return Err(Error::WrongExpectedVersion {
                        expected: expected.to_string(),
                        current: "NoStream".to_string(),
                    });
                }

                self.write_new(stream_id, current, &proposed)
            }

            ExpectedVersion::NoStream => {
                if let Some(current_number) = current {
                    if self.is_idempotent_replay(stream_id, 1, &proposed)? {
                        return self.idempotent_result_at(stream_id, proposed.len() as u64);
                    }

                    return Err(Error::WrongExpectedVersion {
                        expected: "NoStream".to_string(),
                        current: current_number.to_string(),
                    });
                }

                self.write_new(stream_id, current, &proposed)
            }

            ExpectedVersion::Revision(n) => {
                if current == Some(n) {
                    return self.write_new(stream_id, current, &proposed);
                }

                if self.is_idempotent_replay(stream_id, n + 1, &proposed)? {
                    return self.idempotent_result_at(stream_id, n + proposed.len() as u64);
                }

                if proposed.len() == 1 {
                    if let Some(existing) = self.read_event(stream_id, n + 1)? {
                        if existing.id == proposed[0].id {
                            return self.idempotent_result_at(stream_id, n + 1);
                        }
                    }
                }

                Err(Error::WrongExpectedVersion {
                    expected: expected.to_string(),
                    current: current
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "NoStream".to_string()),
                })
            }
        }
    }

    /// Reads `stream_id` backward from `from_event_number` (`-1` for the
    /// tail), up to `max_count` events. Returns the events read, the event
    /// number to resume from (`-1` once exhausted), and whether the stream
    /// start was reached.
    pub fn read_stream_backward(
        &self,
        stream_id: &StreamId,
        from_event_number: i64,
        max_count: usize,
    ) -> Result<(Vec<EventRecord>, i64, bool)> {
        let Some(last) = self.last_event_number(stream_id) else {
            return Ok((Vec::new(), -1, true));
        };

        let start = if from_event_number < 0 {
            Revision::End
        } else {
            Revision::Revision((from_event_number as u64).min(last))
        };

        let positions = {
            let index = self.index.read().unwrap();
            index.iter_backward(stream_id, start)
        };

        let taken = positions.len().min(max_count);
        let events = positions[..taken]
            .iter()
            .map(|&(_, position)| Ok(decode_event_body(self.read_body_at(position.offset())?)))
            .collect::<Result<Vec<_>>>()?;

        let next = if taken == positions.len() {
            -1
        } else {
            positions[taken].0 as i64
        };

        Ok((events, next, next < 0))
    }

    /// Reads `stream_id` forward from `from_event_number`, up to
    /// `max_count` events.
    pub fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_event_number: u64,
        max_count: usize,
    ) -> Result<Vec<EventRecord>> {
        let positions = {
            let index = self.index.read().unwrap();
            index.iter_forward(stream_id, Revision::Revision(from_event_number))
        };

        positions
            .into_iter()
            .take(max_count)
            .map(|(_, position)| Ok(decode_event_body(self.read_body_at(position.offset())?)))
            .collect()
    }

    /// Single entry point for a directional stream read, dispatching to
    /// `read_stream_forward`/`read_stream_backward`. `from` is interpreted
    /// as an event number for `Direction::Forward` and ignored (`Start`
    /// reads from the tail, matching `-1`) beyond that for `Direction::Backward`.
    pub fn read_stream(
        &self,
        stream_id: &StreamId,
        direction: Direction,
        from: Revision<u64>,
        max_count: usize,
    ) -> Result<(Vec<EventRecord>, i64, bool)> {
        match direction {
            Direction::Forward => {
                let from_event_number = from.raw();
                let events = self.read_stream_forward(stream_id, from_event_number, max_count)?;
                let next = events.last().map(|e| e.event_number as i64 + 1).unwrap_or(-1);
                let is_end = events.len() < max_count;
                Ok((events, next, is_end))
            }
            Direction::Backward => {
                let from_event_number = match from {
                    Revision::End => -1,
                    other => other.raw() as i64,
                };
                self.read_stream_backward(stream_id, from_event_number, max_count)
            }
        }
    }

    pub fn start_transaction(&self, stream_id: StreamId, expected: ExpectedVersion) -> Transaction {
        Transaction {
            stream_id,
            expected,
            pending: Vec::new(),
        }
    }

    /// Commits the whole transaction as one batch: the underlying
    /// `append_batch` call makes every event visible atomically.
    pub fn commit(&self, txn: Transaction) -> Result<WriteResult> {
        self.append(&txn.stream_id, txn.expected, txn.pending)
    }
}

fn build_record(
    stream_id: &StreamId,
    event_number: u64,
    id: uuid::Uuid,
    event_type: &str,
    data: Bytes,
    metadata: Bytes,
    offset: u64,
) -> (EventRecord, Bytes) {
    let position = Position::of(offset);
    let record = EventRecord {
        id,
        stream_id: stream_id.clone(),
        event_number,
        position,
        event_type: event_type.to_string(),
        data,
        metadata,
        created: Utc::now(),
    };

    let body = frame(&encode_event_body(&record));
    (record, body)
}

/// An in-flight multi-write against a single stream, committed as one
/// atomically-visible batch.
pub struct Transaction {
    stream_id: StreamId,
    expected: ExpectedVersion,
    pending: Vec<ProposedEvent>,
}

impl Transaction {
    pub fn write(&mut self, events: Vec<ProposedEvent>) {
        self.pending.extend(events);
    }
}
