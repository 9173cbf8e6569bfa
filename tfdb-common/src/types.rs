use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt::{self, Display};
use uuid::Uuid;

/// Name of a logical stream. Streams are created implicitly by the first
/// successful append and are otherwise opaque strings to the storage core.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expected-version values used to guard an append against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No concurrency check: append no matter the stream's current state.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist, whatever its current revision.
    StreamExists,
    /// The stream's last event number must equal this value exactly.
    Revision(u64),
}

impl ExpectedVersion {
    pub fn as_i64(&self) -> i64 {
        match self {
            ExpectedVersion::Revision(v) => *v as i64,
            ExpectedVersion::NoStream => -1,
            ExpectedVersion::Any => -2,
            ExpectedVersion::StreamExists => -4,
        }
    }
}

impl Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Revision(v) => write!(f, "{}", v),
            ExpectedVersion::NoStream => write!(f, "'no stream'"),
            ExpectedVersion::Any => write!(f, "'any'"),
            ExpectedVersion::StreamExists => write!(f, "'stream exists'"),
        }
    }
}

/// A read cursor: either end of the stream/log, or a concrete point in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision<A> {
    Start,
    End,
    Revision(A),
}

impl Revision<u64> {
    pub fn is_greater_than(&self, rev: u64) -> bool {
        match self {
            Revision::Start => false,
            Revision::End => true,
            Revision::Revision(point) => *point > rev,
        }
    }

    pub fn raw(&self) -> u64 {
        match self {
            Revision::Start => 0,
            Revision::End => u64::MAX,
            Revision::Revision(r) => *r,
        }
    }
}

impl<D: Display> Display for Revision<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Start => write!(f, "Start"),
            Revision::End => write!(f, "End"),
            Revision::Revision(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A position in the global transaction log, expressed as the classic
/// commit/prepare offset pair. For this single-node log, commit and
/// prepare offsets always coincide: there is no separate replication step
/// that could make them diverge, but the pair is kept because downstream
/// consumers (out of scope here) rely on the shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub commit: i64,
    pub prepare: i64,
}

impl Position {
    pub const START: Position = Position { commit: 0, prepare: 0 };
    pub const END: Position = Position { commit: -1, prepare: -1 };

    pub fn of(offset: u64) -> Self {
        Self {
            commit: offset as i64,
            prepare: offset as i64,
        }
    }

    pub fn offset(&self) -> u64 {
        self.commit as u64
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

/// An event proposed by a client for append, not yet assigned a position.
#[derive(Debug, Clone)]
pub struct ProposedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: Bytes,
    pub metadata: Bytes,
}

impl ProposedEvent {
    pub fn new(event_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Bytes::new(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: Bytes) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An event as committed to the log: a `ProposedEvent` plus the coordinates
/// it was assigned.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub event_number: u64,
    pub position: Position,
    pub event_type: String,
    pub data: Bytes,
    pub metadata: Bytes,
    pub created: DateTime<Utc>,
}

pub const STREAM_CREATED_EVENT_TYPE: &str = "$stream-created";

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy)]
pub struct WriteResult {
    pub next_expected_version: u64,
    pub position: Position,
}
