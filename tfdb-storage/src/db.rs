use crate::checkpoint::Checkpoints;
use crate::chunk::ChunkFile;
use crate::constants::TRANSIENT_SUFFIXES;
use crate::naming::FileNamingStrategy;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tfdb_common::{CorruptionCause, Error, Result};

#[derive(Debug, Clone)]
pub struct ChunkDbOptions {
    pub chunk_size: usize,
    pub prefer_mmap_checkpoints: bool,
    pub verify_hash_on_open: bool,
}

impl Default for ChunkDbOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::constants::DEFAULT_CHUNK_SIZE,
            prefer_mmap_checkpoints: false,
            verify_hash_on_open: true,
        }
    }
}

/// A read-only snapshot of one chunk's roster entry, for diagnostics.
#[derive(Debug, Clone)]
pub struct ChunkSummary {
    pub start: usize,
    pub end: usize,
    pub version: usize,
    pub is_completed: bool,
}

struct State {
    chunks: BTreeMap<usize, ChunkFile>,
    index_to_start: BTreeMap<usize, usize>,
    ongoing_start: usize,
}

impl State {
    fn register(&mut self, chunk: ChunkFile) {
        let start = chunk.start();
        let end = chunk.end();

        for i in start..=end {
            self.index_to_start.insert(i, start);
        }

        self.chunks.insert(start, chunk);
    }

    fn owning_start(&self, global_position: u64, chunk_size: usize) -> Option<usize> {
        let idx = (global_position / chunk_size as u64) as usize;
        self.index_to_start.get(&idx).copied()
    }
}

/// The chunked transaction-file database: a directory of chunk files
/// governed by the four checkpoints, with open-time recovery into a
/// consistent runtime roster.
pub struct ChunkDb {
    dir: PathBuf,
    naming: FileNamingStrategy,
    chunk_size: usize,
    pub checkpoints: Checkpoints,
    state: RwLock<State>,
}

impl fmt::Debug for ChunkDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDb")
            .field("dir", &self.dir)
            .field("naming", &self.naming)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl ChunkDb {
    pub fn open(
        dir: impl AsRef<Path>,
        naming: FileNamingStrategy,
        options: ChunkDbOptions,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let checkpoints = Checkpoints::open(&dir, options.prefer_mmap_checkpoints)?;
        let writer = checkpoints.writer.read();
        let chaser = checkpoints.chaser.read();
        let epoch = checkpoints.epoch.read();

        if chaser > writer {
            return Err(Error::CorruptDatabase(
                CorruptionCause::ReaderCheckpointHigherThanWriter {
                    checkpoint: "chaser",
                    value: chaser,
                    writer,
                },
            ));
        }

        if epoch > writer {
            return Err(Error::CorruptDatabase(
                CorruptionCause::ReaderCheckpointHigherThanWriter {
                    checkpoint: "epoch",
                    value: epoch,
                    writer,
                },
            ));
        }

        let chunk_size = options.chunk_size;
        let last_start = (writer as u64 / chunk_size as u64) as usize;
        let boundary = (writer as u64 % chunk_size as u64) == 0;
        let frontier = last_start + usize::from(boundary);

        delete_transient_files(&dir)?;
        let live_files = naming.latest_for_each_start(&dir)?;

        for &start in live_files.keys() {
            if start > frontier {
                return Err(Error::CorruptDatabase(
                    CorruptionCause::ExtraneousFileFound { start },
                ));
            }
        }

        let required_end = if boundary { last_start } else { last_start + 1 };
        for start in 0..required_end {
            if !live_files.contains_key(&start) {
                return Err(Error::CorruptDatabase(CorruptionCause::ChunkNotFound {
                    start,
                }));
            }
        }

        let mut live_versions = BTreeMap::new();
        for (&start, &(keep_version, _)) in &live_files {
            for (version, path) in naming.all_versions_of(&dir, start)? {
                if version != keep_version {
                    fs::remove_file(path)?;
                }
            }

            live_versions.insert(start, keep_version);
        }

        let ongoing_start = last_start;
        let needs_fresh_tail = boundary && !live_versions.contains_key(&ongoing_start);

        let mut state = State {
            chunks: BTreeMap::new(),
            index_to_start: BTreeMap::new(),
            ongoing_start,
        };

        for (&start, &version) in &live_versions {
            if start == ongoing_start {
                continue;
            }

            let path = dir.join(naming.filename_for(start, version));
            let chunk = ChunkFile::open_completed(path, version, options.verify_hash_on_open)?;
            state.register(chunk);
        }

        if needs_fresh_tail {
            let chunk = ChunkFile::create(&dir, &naming, ongoing_start, ongoing_start, 0, chunk_size)?;
            state.register(chunk);
        } else {
            let version = live_versions[&ongoing_start];
            let path = dir.join(naming.filename_for(ongoing_start, version));
            let chunk = ChunkFile::open_ongoing(path, version, chunk_size)?;
            state.register(chunk);
        }

        Ok(Self {
            dir,
            naming,
            chunk_size,
            checkpoints,
            state: RwLock::new(state),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn writer_position(&self) -> u64 {
        self.checkpoints.writer.read() as u64
    }

    pub fn chaser_position(&self) -> u64 {
        self.checkpoints.chaser.read() as u64
    }

    /// Appends a raw record at the writer checkpoint, rolling to a fresh
    /// ongoing chunk if the current tail can't hold it. Returns the global
    /// offset the record was written at.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let offsets = self.append_batch(std::slice::from_ref(&bytes))?;
        Ok(offsets[0])
    }

    /// Appends every record in `batch` while holding the write lock for the
    /// whole call, so a concurrent reader never observes part of the batch.
    /// Flushes the writer/chaser checkpoints once, after the last record.
    /// Returns the global offset each record was written at, in order.
    pub fn append_batch(&self, batch: &[&[u8]]) -> Result<Vec<u64>> {
        let mut state = self.state.write().unwrap();
        let mut position = self.checkpoints.writer.read() as u64;
        let mut offsets = Vec::with_capacity(batch.len());

        for bytes in batch {
            let len = bytes.len() as u64;

            loop {
                let chunk = state.chunks.get(&state.ongoing_start).unwrap();

                if chunk.remaining_space_from(position) >= len {
                    break;
                }

                let data_size = (position - chunk.start_position()) as usize;
                let next_start = chunk.end() + 1;
                let roll_to = chunk.end_position();

                let ongoing_start = state.ongoing_start;
                state
                    .chunks
                    .get_mut(&ongoing_start)
                    .unwrap()
                    .complete(data_size)?;

                let new_chunk = ChunkFile::create(
                    &self.dir,
                    &self.naming,
                    next_start,
                    next_start,
                    0,
                    self.chunk_size,
                )?;
                state.register(new_chunk);
                state.ongoing_start = next_start;
                position = roll_to;
            }

            let chunk = state.chunks.get(&state.ongoing_start).unwrap();
            let local_offset = chunk.local_offset(position);
            chunk.append(local_offset, bytes)?;

            offsets.push(position);
            position += len;
        }

        let next_position = position as i64;
        self.checkpoints.writer.write(next_position);
        self.checkpoints.writer.flush()?;
        self.checkpoints.chaser.write(next_position);
        self.checkpoints.chaser.flush()?;

        Ok(offsets)
    }

    /// Every committed record from offset 0 up to the writer checkpoint, in
    /// log order. Used to rebuild the stream index at open time.
    pub fn scan_records(&self) -> Result<Vec<(u64, Bytes)>> {
        let prefix_len = crate::record::prefix_size() as u64;
        let mut position = 0u64;
        let writer = self.writer_position();
        let mut out = Vec::new();

        while position < writer {
            let prefix = self.read_at(position, prefix_len as usize)?;
            let body_len = crate::record::read_prefix_len(&prefix) as usize;
            let body = self.read_at(position + prefix_len, body_len)?;
            out.push((position, body));
            position += crate::record::framed_size(body_len) as u64;
        }

        Ok(out)
    }

    pub fn read_at(&self, position: u64, len: usize) -> Result<Bytes> {
        let state = self.state.read().unwrap();
        let start = state
            .owning_start(position, self.chunk_size)
            .ok_or_else(|| {
                Error::CorruptDatabase(CorruptionCause::ChunkNotFound {
                    start: (position / self.chunk_size as u64) as usize,
                })
            })?;

        let chunk = state.chunks.get(&start).unwrap();
        debug_assert!(chunk.contains_log_position(position));
        let local_offset = chunk.local_offset(position);
        Ok(chunk.read_at(local_offset, len)?)
    }

    /// Seals the current ongoing chunk without rolling to a new one. Used
    /// by callers that want a durable boundary without appending further.
    pub fn complete_ongoing(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let writer = self.checkpoints.writer.read() as u64;
        let ongoing_start = state.ongoing_start;
        let chunk = state.chunks.get_mut(&ongoing_start).unwrap();

        if chunk.is_completed() {
            return Ok(());
        }

        let data_size = (writer - chunk.start_position()) as usize;
        chunk.complete(data_size)?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.checkpoints.flush_all()?;
        Ok(())
    }

    pub fn chunk_roster(&self) -> Vec<ChunkSummary> {
        let state = self.state.read().unwrap();
        state
            .chunks
            .values()
            .map(|chunk| ChunkSummary {
                start: chunk.start(),
                end: chunk.end(),
                version: chunk.version,
                is_completed: chunk.is_completed(),
            })
            .collect()
    }
}

/// Walks `dir` and deletes recognized transient files. Everything else
/// (chunk files of any naming strategy, unrelated files) is left untouched.
fn delete_transient_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };

        if TRANSIENT_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix)) {
            fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_testdir::TempDir;

    fn tiny_options() -> ChunkDbOptions {
        ChunkDbOptions {
            chunk_size: 32,
            ..ChunkDbOptions::default()
        }
    }

    #[test]
    fn appended_records_survive_a_reopen() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), ChunkDbOptions::default()).unwrap();
            db.append(b"first").unwrap();
            db.append(b"second").unwrap();
            db.close().unwrap();
        }

        let db = ChunkDb::open(&dir, naming, ChunkDbOptions::default()).unwrap();
        let records = db.scan_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.as_ref(), b"first");
        assert_eq!(records[1].1.as_ref(), b"second");
    }

    #[test]
    fn append_rolls_to_a_fresh_chunk_once_the_tail_is_full() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();
        let db = ChunkDb::open(&dir, naming, tiny_options()).unwrap();

        for _ in 0..4 {
            db.append(b"0123456789").unwrap();
        }

        let roster = db.chunk_roster();
        assert_eq!(roster.len(), 2);
        assert!(roster[0].is_completed);
        assert!(!roster[1].is_completed);
    }

    #[test]
    fn complete_ongoing_seals_the_tail_without_rolling() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();
        let db = ChunkDb::open(&dir, naming, ChunkDbOptions::default()).unwrap();

        db.append(b"hello").unwrap();
        db.complete_ongoing().unwrap();

        let roster = db.chunk_roster();
        assert_eq!(roster.len(), 1);
        assert!(roster[0].is_completed);
    }

    #[test]
    fn open_rejects_a_missing_required_chunk_file() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), tiny_options()).unwrap();
            for _ in 0..3 {
                db.append(b"0123456789").unwrap();
            }
            db.close().unwrap();
        }

        std::fs::remove_file(dir.join(naming.filename_for(0, 0))).unwrap();

        let err = ChunkDb::open(&dir, naming, tiny_options()).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::ChunkNotFound { start: 0 })
        ));
    }

    #[test]
    fn open_rejects_an_extraneous_chunk_file_beyond_the_writer_frontier() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), ChunkDbOptions::default()).unwrap();
            db.append(b"hello").unwrap();
            db.close().unwrap();
        }

        std::fs::write(dir.join(naming.filename_for(5, 0)), []).unwrap();

        let err = ChunkDb::open(&dir, naming, ChunkDbOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::ExtraneousFileFound { start: 5 })
        ));
    }

    #[test]
    fn open_collapses_duplicate_versions_keeping_the_highest() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), tiny_options()).unwrap();
            for _ in 0..3 {
                db.append(b"0123456789").unwrap();
            }
            db.close().unwrap();
        }

        let completed = dir.join(naming.filename_for(0, 0));
        let duplicate = dir.join(naming.filename_for(0, 1));
        std::fs::copy(&completed, &duplicate).unwrap();

        let db = ChunkDb::open(&dir, naming.clone(), tiny_options()).unwrap();
        assert!(!completed.exists());
        assert!(duplicate.exists());

        let roster = db.chunk_roster();
        let sealed = roster.iter().find(|c| c.start == 0).unwrap();
        assert_eq!(sealed.version, 1);
    }

    #[test]
    fn writer_exactly_on_a_boundary_creates_a_fresh_ongoing_tail() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), tiny_options()).unwrap();
            db.append(&[0u8; 32]).unwrap();
            db.complete_ongoing().unwrap();
            db.close().unwrap();
        }

        let db = ChunkDb::open(&dir, naming, tiny_options()).unwrap();
        let roster = db.chunk_roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].start, 0);
        assert!(roster[0].is_completed);
        assert_eq!(roster[1].start, 1);
        assert!(!roster[1].is_completed);
    }

    #[test]
    fn open_preserves_non_chunk_files_and_deletes_transient_ones() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), ChunkDbOptions::default()).unwrap();
            db.append(b"hello").unwrap();
            db.close().unwrap();
        }

        std::fs::write(dir.join("bla"), b"keep me").unwrap();
        std::fs::write(dir.join("bla.tmp"), b"drop me").unwrap();
        std::fs::write(dir.join("bla.scavenge.tmp"), b"drop me too").unwrap();

        ChunkDb::open(&dir, naming, ChunkDbOptions::default()).unwrap();

        assert!(dir.join("bla").exists());
        assert!(!dir.join("bla.tmp").exists());
        assert!(!dir.join("bla.scavenge.tmp").exists());
    }

    #[test]
    fn open_rejects_a_chaser_checkpoint_ahead_of_the_writer() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        {
            let db = ChunkDb::open(&dir, naming.clone(), ChunkDbOptions::default()).unwrap();
            db.append(b"hello").unwrap();
            db.close().unwrap();
        }

        std::fs::write(dir.join("chaser.chk"), 1_000i64.to_le_bytes()).unwrap();

        let err = ChunkDb::open(&dir, naming, ChunkDbOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::ReaderCheckpointHigherThanWriter {
                checkpoint: "chaser",
                ..
            })
        ));
    }
}
