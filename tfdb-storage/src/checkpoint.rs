use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// A durable, monotonic 64-bit counter. `write` updates the in-process
/// cached value immediately (the "cached" variant from the data model);
/// `flush` is the explicit durability boundary a caller crosses at a
/// commit point.
pub trait Checkpoint: Send + Sync {
    fn read(&self) -> i64;
    fn write(&self, value: i64);
    fn flush(&self) -> io::Result<()>;
}

const PAGE_SIZE: u64 = 4_096;

fn read_or_init(file: &mut File, initial: i64) -> io::Result<i64> {
    let len = file.metadata()?.len();

    if len >= 8 {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        return Ok(i64::from_le_bytes(buf));
    }

    file.set_len(8)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&initial.to_le_bytes())?;
    file.sync_all()?;

    Ok(initial)
}

/// Plain-file backed checkpoint: a single `i64` at offset 0, updated via
/// seek + write + flush.
pub struct PlainFileCheckpoint {
    file: Mutex<File>,
    value: AtomicI64,
}

impl PlainFileCheckpoint {
    pub fn open(path: impl AsRef<Path>, initial: i64) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let value = read_or_init(&mut file, initial)?;

        Ok(Self {
            file: Mutex::new(file),
            value: AtomicI64::new(value),
        })
    }
}

impl Checkpoint for PlainFileCheckpoint {
    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    fn flush(&self) -> io::Result<()> {
        let value = self.value.load(Ordering::Acquire);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&value.to_le_bytes())?;
        file.sync_all()
    }
}

/// Memory-mapped checkpoint, preferred where the OS provides it: writes go
/// straight to the mapped page and `flush` calls `msync`.
pub struct MemoryMappedCheckpoint {
    mmap: Mutex<MmapMut>,
    value: AtomicI64,
}

impl MemoryMappedCheckpoint {
    pub fn open(path: impl AsRef<Path>, initial: i64) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if file.metadata()?.len() < PAGE_SIZE {
            file.set_len(PAGE_SIZE)?;
        }

        let value = read_or_init_mapped(&mut file, initial)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap: Mutex::new(mmap),
            value: AtomicI64::new(value),
        })
    }
}

fn read_or_init_mapped(file: &mut File, initial: i64) -> io::Result<i64> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    let value = i64::from_le_bytes(buf);

    // A freshly created all-zero file is indistinguishable from a
    // legitimately zero checkpoint unless the caller's initial value is
    // itself non-zero (writer/chaser default to 0, epoch/truncate to -1,
    // so a zeroed page only ever mismatches for the latter two).
    if value == 0 && initial != 0 {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&initial.to_le_bytes())?;
        file.sync_all()?;
        return Ok(initial);
    }

    Ok(value)
}

impl Checkpoint for MemoryMappedCheckpoint {
    fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    fn flush(&self) -> io::Result<()> {
        let value = self.value.load(Ordering::Acquire);
        let mut mmap = self.mmap.lock().unwrap();
        mmap[0..8].copy_from_slice(&value.to_le_bytes());
        mmap.flush()
    }
}

fn open_checkpoint(
    path: PathBuf,
    initial: i64,
    prefer_mmap: bool,
) -> io::Result<Box<dyn Checkpoint>> {
    if prefer_mmap {
        return Ok(Box::new(MemoryMappedCheckpoint::open(path, initial)?));
    }

    Ok(Box::new(PlainFileCheckpoint::open(path, initial)?))
}

/// The four distinguished checkpoints a chunk database carries for its
/// lifetime.
pub struct Checkpoints {
    pub writer: Box<dyn Checkpoint>,
    pub chaser: Box<dyn Checkpoint>,
    pub epoch: Box<dyn Checkpoint>,
    pub truncate: Box<dyn Checkpoint>,
}

impl Checkpoints {
    pub fn open(dir: &Path, prefer_mmap: bool) -> io::Result<Self> {
        Ok(Self {
            writer: open_checkpoint(dir.join("writer.chk"), 0, prefer_mmap)?,
            chaser: open_checkpoint(dir.join("chaser.chk"), 0, prefer_mmap)?,
            epoch: open_checkpoint(dir.join("epoch.chk"), -1, prefer_mmap)?,
            truncate: open_checkpoint(dir.join("truncate.chk"), -1, prefer_mmap)?,
        })
    }

    pub fn flush_all(&self) -> io::Result<()> {
        self.writer.flush()?;
        self.chaser.flush()?;
        self.epoch.flush()?;
        self.truncate.flush()
    }
}
