use crate::chunk::footer::ChunkFooter;
use crate::chunk::header::ChunkHeader;
use crate::constants::{CHUNK_FOOTER_SIZE, CHUNK_HASH_SIZE, CHUNK_HEADER_SIZE};
use crate::naming::FileNamingStrategy;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tfdb_common::{CorruptionCause, Error, Result};

/// A single chunk file: header, a logical body region, and (once sealed)
/// a footer. Covers the on-disk layout and byte-level operations from the
/// chunk-file component; version/roster bookkeeping lives one layer up in
/// `ChunkDb`.
#[derive(Debug)]
pub struct ChunkFile {
    pub header: ChunkHeader,
    pub footer: Option<ChunkFooter>,
    pub version: usize,
    path: PathBuf,
    file: File,
}

impl ChunkFile {
    /// Allocates a brand new ongoing chunk covering `[start, end]`.
    pub fn create(
        dir: &Path,
        naming: &FileNamingStrategy,
        start: usize,
        end: usize,
        version: usize,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let path = dir.join(naming.filename_for(start, version));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        file.set_len((CHUNK_HEADER_SIZE + chunk_size + CHUNK_FOOTER_SIZE) as u64)?;

        let header = ChunkHeader::new(start, end, chunk_size);
        let mut buf = BytesMut::new();
        header.put(&mut buf);
        file.write_all_at(&buf.freeze(), 0)?;

        Ok(Self {
            header,
            footer: None,
            version,
            path,
            file,
        })
    }

    /// Opens a chunk that must be complete, validating its declared sizes
    /// and, if requested, its content hash.
    pub fn open_completed(path: PathBuf, version: usize, verify_hash: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < CHUNK_HEADER_SIZE as u64 + CHUNK_FOOTER_SIZE as u64 {
            return Err(corrupt_chunk(&path));
        }

        let mut header_buf = vec![0u8; CHUNK_HEADER_SIZE];
        file.read_exact_at(&mut header_buf, 0)
            .map_err(|_| corrupt_chunk(&path))?;
        let header = ChunkHeader::get(Bytes::from(header_buf));

        let footer_bytes = read_footer_region(&file, file_len)
            .map_err(|_| corrupt_chunk(&path))?;
        let footer = ChunkFooter::get(footer_bytes).ok_or_else(|| corrupt_chunk(&path))?;

        let expected_len =
            CHUNK_HEADER_SIZE as u64 + footer.actual_data_size as u64 + CHUNK_FOOTER_SIZE as u64;

        if file_len != expected_len || header.chunk_end_number < header.chunk_start_number {
            return Err(corrupt_chunk(&path));
        }

        let chunk = Self {
            header,
            footer: Some(footer),
            version,
            path: path.clone(),
            file,
        };

        if verify_hash {
            let actual = chunk.compute_hash()?;
            if actual != chunk.footer.as_ref().unwrap().checksum {
                return Err(corrupt_chunk(&path));
            }
        }

        Ok(chunk)
    }

    /// Opens a chunk as the ongoing tail: header only, no body-size
    /// validation, since a crash may have left it under-filled. A file too
    /// short to even hold a header is still corrupt, crash or not.
    pub fn open_ongoing(path: PathBuf, version: usize, expected_chunk_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < CHUNK_HEADER_SIZE as u64 {
            return Err(corrupt_chunk(&path));
        }

        let mut header_buf = vec![0u8; CHUNK_HEADER_SIZE];
        file.read_exact_at(&mut header_buf, 0)
            .map_err(|_| corrupt_chunk(&path))?;
        let header = ChunkHeader::get(Bytes::from(header_buf));

        if header.chunk_size != expected_chunk_size {
            tracing::warn!(
                path = %path.display(),
                declared = header.chunk_size,
                expected = expected_chunk_size,
                "ongoing chunk declares a chunk size different from the database's configured size"
            );
        }

        file.set_len((CHUNK_HEADER_SIZE + header.chunk_size + CHUNK_FOOTER_SIZE) as u64)?;

        Ok(Self {
            header,
            footer: None,
            version,
            path,
            file,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.footer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&self) -> usize {
        self.header.chunk_start_number
    }

    pub fn end(&self) -> usize {
        self.header.chunk_end_number
    }

    pub fn start_position(&self) -> u64 {
        self.header.chunk_start_number as u64 * self.header.chunk_size as u64
    }

    pub fn end_position(&self) -> u64 {
        (self.header.chunk_end_number as u64 + 1) * self.header.chunk_size as u64
    }

    pub fn contains_log_position(&self, position: u64) -> bool {
        position >= self.start_position() && position < self.end_position()
    }

    pub fn local_offset(&self, global_position: u64) -> u64 {
        global_position - self.start_position()
    }

    pub fn remaining_space_from(&self, global_position: u64) -> u64 {
        self.end_position().saturating_sub(global_position)
    }

    /// Appends `bytes` at `local_offset`. Fails if it would spill past the
    /// declared chunk size.
    pub fn append(&self, local_offset: u64, bytes: &[u8]) -> io::Result<()> {
        if local_offset + bytes.len() as u64 > self.header.chunk_size as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "append would exceed chunk size",
            ));
        }

        self.file
            .write_all_at(bytes, CHUNK_HEADER_SIZE as u64 + local_offset)
    }

    pub fn read_at(&self, local_offset: u64, len: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.file
            .read_exact_at(&mut buf, CHUNK_HEADER_SIZE as u64 + local_offset)?;
        Ok(Bytes::from(buf))
    }

    /// Seals the chunk: computes its checksum over `[header, body)`,
    /// writes the footer right after the used body, and truncates the
    /// file to its final size.
    pub fn complete(&mut self, actual_data_size: usize) -> io::Result<()> {
        let final_len = CHUNK_HEADER_SIZE + actual_data_size + CHUNK_FOOTER_SIZE;
        self.file.set_len(final_len as u64)?;

        let checksum = self.compute_hash_over(actual_data_size)?;
        let footer = ChunkFooter::completed(actual_data_size as i32, checksum);

        let mut buf = BytesMut::new();
        footer.put(&mut buf);
        self.file
            .write_all_at(&buf.freeze(), (CHUNK_HEADER_SIZE + actual_data_size) as u64)?;
        self.file.sync_all()?;

        self.footer = Some(footer);

        Ok(())
    }

    fn compute_hash(&self) -> io::Result<[u8; CHUNK_HASH_SIZE]> {
        let actual_data_size = self
            .footer
            .as_ref()
            .map(|f| f.actual_data_size as usize)
            .unwrap_or(0);
        self.compute_hash_over(actual_data_size)
    }

    fn compute_hash_over(&self, actual_data_size: usize) -> io::Result<[u8; CHUNK_HASH_SIZE]> {
        let mut hasher = Md5::new();
        let mut remaining = CHUNK_HEADER_SIZE + actual_data_size;
        let mut buf = [0u8; 8192];
        let mut file = self.file.try_clone()?;

        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(0))?;

        while remaining > 0 {
            let to_read = remaining.min(buf.len());
            file.read_exact(&mut buf[..to_read])?;
            hasher.update(&buf[..to_read]);
            remaining -= to_read;
        }

        let digest = hasher.finalize();
        let mut out = [0u8; CHUNK_HASH_SIZE];
        out.copy_from_slice(&digest);
        Ok(out)
    }
}

fn corrupt_chunk(path: &Path) -> Error {
    Error::CorruptDatabase(CorruptionCause::BadChunkInDatabase {
        path: path.display().to_string(),
    })
}

fn read_footer_region(file: &File, file_len: u64) -> io::Result<Bytes> {
    if file_len < CHUNK_FOOTER_SIZE as u64 {
        return Ok(Bytes::from(vec![0u8; CHUNK_FOOTER_SIZE]));
    }

    let mut buf = vec![0u8; CHUNK_FOOTER_SIZE];
    file.read_exact_at(&mut buf, file_len - CHUNK_FOOTER_SIZE as u64)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_testdir::TempDir;

    #[test]
    fn a_completed_chunk_reopens_and_verifies_its_hash() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        let mut chunk = ChunkFile::create(&dir, &naming, 0, 0, 0, 4096).unwrap();
        chunk.append(0, b"hello world").unwrap();
        chunk.complete(b"hello world".len()).unwrap();

        let path = dir.join(naming.filename_for(0, 0));
        let reopened = ChunkFile::open_completed(path, 0, true).unwrap();
        assert!(reopened.is_completed());
        assert_eq!(reopened.read_at(0, 5).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn a_tampered_chunk_fails_hash_verification_on_open() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();

        let mut chunk = ChunkFile::create(&dir, &naming, 0, 0, 0, 4096).unwrap();
        chunk.append(0, b"hello world").unwrap();
        chunk.complete(b"hello world".len()).unwrap();

        // Corrupt one byte of the committed body after sealing.
        chunk.append(0, b"J").unwrap();

        let path = dir.join(naming.filename_for(0, 0));
        let err = ChunkFile::open_completed(path, 0, true).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::BadChunkInDatabase { .. })
        ));
    }

    #[test]
    fn append_past_the_declared_chunk_size_is_rejected() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();
        let chunk = ChunkFile::create(&dir, &naming, 0, 0, 0, 8).unwrap();

        assert!(chunk.append(0, b"way too long for this chunk").is_err());
    }

    #[test]
    fn opening_a_garbage_file_as_the_ongoing_tail_reports_corruption_not_io_error() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();
        let path = dir.join(naming.filename_for(0, 0));
        std::fs::write(&path, b"this is just some test blahbydy blah").unwrap();

        let err = ChunkFile::open_ongoing(path, 0, 4096).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::BadChunkInDatabase { .. })
        ));
    }

    #[test]
    fn opening_a_too_short_file_as_completed_reports_corruption_not_io_error() {
        let dir = TempDir::default();
        let naming = FileNamingStrategy::versioned();
        let path = dir.join(naming.filename_for(0, 0));
        std::fs::write(&path, b"short").unwrap();

        let err = ChunkFile::open_completed(path, 0, true).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptDatabase(CorruptionCause::BadChunkInDatabase { .. })
        ));
    }
}
