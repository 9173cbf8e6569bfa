use thiserror::Error;

/// Cause of a `CorruptDatabase` error raised while opening a chunk database.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorruptionCause {
    #[error("chunk at '{path}' failed header/footer/size/hash validation")]
    BadChunkInDatabase { path: String },

    #[error("no chunk file found for start number {start}")]
    ChunkNotFound { start: usize },

    #[error("live chunk file for start number {start} lies beyond the writer frontier")]
    ExtraneousFileFound { start: usize },

    #[error("reader checkpoint {checkpoint} ({value}) is higher than writer ({writer})")]
    ReaderCheckpointHigherThanWriter {
        checkpoint: &'static str,
        value: i64,
        writer: i64,
    },
}

/// Errors surfaced by the storage core, per the error handling design.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt database: {0}")]
    CorruptDatabase(#[from] CorruptionCause),

    #[error("wrong expected version: expected {expected}, stream is at {current}")]
    WrongExpectedVersion { expected: String, current: String },

    #[error("cannot establish connection: {0}")]
    CannotEstablishConnection(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
