mod append;
mod checkpoint;
mod chunk;
mod constants;
mod db;
mod dispatch;
mod emitted_stream;
mod index;
mod naming;
mod record;

pub use append::{EventStore, Transaction};
pub use checkpoint::{Checkpoint, Checkpoints, MemoryMappedCheckpoint, PlainFileCheckpoint};
pub use chunk::{ChunkFile, ChunkFooter, ChunkHeader};
pub use constants::{CHUNK_FOOTER_SIZE, CHUNK_HASH_SIZE, CHUNK_HEADER_SIZE, DEFAULT_CHUNK_SIZE};
pub use db::{ChunkDb, ChunkDbOptions, ChunkSummary};
pub use dispatch::{ReadBackwardCompleted, ReadDispatcher, WriteDispatcher, WriteOutcome};
pub use emitted_stream::{EmitterState, EmittedStream, SupervisorSignal};
pub use index::{stream_hash, StreamIndex};
pub use naming::FileNamingStrategy;
