mod checkpoint_tag;
mod error;
mod types;

pub use checkpoint_tag::{CheckpointTag, EmittedEvent, EmittedEventMetadata, ProjectionVersion};
pub use error::{CorruptionCause, Error, Result};
pub use types::{
    Direction, EventRecord, ExpectedVersion, Position, ProposedEvent, Revision, StreamId,
    WriteResult, STREAM_CREATED_EVENT_TYPE,
};
