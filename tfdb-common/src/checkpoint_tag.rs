use crate::types::{Position, StreamId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A totally ordered position in a projection's source, embedded in an
/// emitted event's metadata so the emitter can resume deterministically
/// after a crash. Backed by the global log `Position` its owning
/// projection last consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointTag {
    pub commit_position: i64,
    pub prepare_position: i64,
}

impl CheckpointTag {
    pub fn from_position(position: Position) -> Self {
        Self {
            commit_position: position.commit,
            prepare_position: position.prepare,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            commit: self.commit_position,
            prepare: self.prepare_position,
        }
    }
}

/// Identifies a projection lineage: the same projection id restarted at a
/// higher epoch supersedes the events emitted by lower epochs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionVersion {
    pub projection_id: String,
    pub epoch: i32,
    pub version: i32,
}

/// Metadata embedded alongside an emitted event's payload: the tag that
/// caused the emit, the emitting projection's lineage, and any
/// caller-supplied extra fields. Self-describing JSON so a reader doesn't
/// need to know in advance which projection wrote a given event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedEventMetadata {
    #[serde(flatten)]
    pub tag: CheckpointTag,
    pub projection_version: ProjectionVersion,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An event a projection wants appended to a downstream stream, carrying
/// enough source-position metadata for the emitter to deduplicate it
/// across restarts.
pub struct EmittedEvent {
    pub stream_id: StreamId,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Bytes,
    pub caused_by_tag: CheckpointTag,
    pub expected_tag: Option<CheckpointTag>,
    pub extra_metadata: serde_json::Map<String, serde_json::Value>,
    pub on_committed: Option<Box<dyn FnOnce(u64) + Send>>,
}

impl std::fmt::Debug for EmittedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmittedEvent")
            .field("stream_id", &self.stream_id)
            .field("event_id", &self.event_id)
            .field("event_type", &self.event_type)
            .field("caused_by_tag", &self.caused_by_tag)
            .field("expected_tag", &self.expected_tag)
            .finish()
    }
}

impl EmittedEvent {
    pub fn new(
        stream_id: StreamId,
        event_type: impl Into<String>,
        payload: Bytes,
        caused_by_tag: CheckpointTag,
    ) -> Self {
        Self {
            stream_id,
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            caused_by_tag,
            expected_tag: None,
            extra_metadata: serde_json::Map::new(),
            on_committed: None,
        }
    }

    pub fn metadata(&self, projection_version: ProjectionVersion) -> EmittedEventMetadata {
        EmittedEventMetadata {
            tag: self.caused_by_tag,
            projection_version,
            extra: self.extra_metadata.clone(),
        }
    }
}
