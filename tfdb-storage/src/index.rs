use digest::Digest;
use sha2::{digest, Sha512};
use std::collections::BTreeMap;
use tfdb_common::{Position, Revision, StreamId};

/// Truncates a stream name down to the 64-bit key the index is keyed by.
/// Collisions are possible in principle; resolving them against the log
/// itself is out of scope here, same as upstream.
pub fn stream_hash(stream_id: &StreamId) -> u64 {
    let mut hasher = Sha512::new();
    hasher.update(stream_id.as_str().as_bytes());

    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}

/// An in-memory `(stream, event number) -> log position` index, rebuilt
/// from a full log replay at open time. Deliberately minimal: one entry
/// per event, no secondary indexing, no query planner.
#[derive(Debug, Default)]
pub struct StreamIndex {
    entries: BTreeMap<(u64, u64), Position>,
    last_revision: BTreeMap<u64, u64>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, stream_id: &StreamId, event_number: u64, position: Position) {
        let hash = stream_hash(stream_id);
        self.entries.insert((hash, event_number), position);
        self.last_revision.insert(hash, event_number);
    }

    pub fn last_event_number(&self, stream_id: &StreamId) -> Option<u64> {
        self.last_revision.get(&stream_hash(stream_id)).copied()
    }

    pub fn position_of(&self, stream_id: &StreamId, event_number: u64) -> Option<Position> {
        self.entries.get(&(stream_hash(stream_id), event_number)).copied()
    }

    /// Positions for `stream_id`, ascending, starting at `from`.
    pub fn iter_forward(&self, stream_id: &StreamId, from: Revision<u64>) -> Vec<(u64, Position)> {
        let hash = stream_hash(stream_id);
        let start = from.raw();

        self.entries
            .range((hash, start)..(hash + 1, 0))
            .map(|(&(_, number), &position)| (number, position))
            .collect()
    }

    /// Positions for `stream_id`, descending, starting at `from` (or the
    /// stream's last event number for `Revision::End`).
    pub fn iter_backward(&self, stream_id: &StreamId, from: Revision<u64>) -> Vec<(u64, Position)> {
        let hash = stream_hash(stream_id);
        let start = match from {
            Revision::End => self.last_revision.get(&hash).copied().unwrap_or(0),
            other => other.raw(),
        };

        let mut out: Vec<_> = self
            .entries
            .range((hash, 0)..=(hash, start))
            .map(|(&(_, number), &position)| (number, position))
            .collect();

        out.reverse();
        out
    }
}
