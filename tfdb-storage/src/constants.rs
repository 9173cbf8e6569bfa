/// Fixed size of a chunk's header region, in bytes.
pub const CHUNK_HEADER_SIZE: usize = 128;

/// Fixed size of a chunk's footer region, in bytes.
pub const CHUNK_FOOTER_SIZE: usize = 128;

/// Default logical body capacity of a chunk (excludes header/footer). Chosen
/// small enough that tests can fill several chunks without allocating
/// gigabytes; callers needing production-sized chunks override it via
/// `ChunkDbOptions::chunk_size`.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Size, in bytes, of the content hash stored in a completed chunk's footer.
pub const CHUNK_HASH_SIZE: usize = 16;

/// Recognized transient filename suffixes, deleted on recovery.
pub const TRANSIENT_SUFFIXES: &[&str] = &[".tmp", ".scavenge.tmp"];
