//! Segment Store collaborator (§1, §6): out of scope as a *design*
//! component (the mapped-file pool lives elsewhere in a real broker), but
//! this crate still ships one concrete, `memmap2`-backed implementation of
//! its trait boundary so the crate is buildable and testable end to end —
//! plus an in-memory one for unit tests, the way the teacher's `repo`
//! module separates `Fs` from a test double.
//!
//! Naming and layout (`SEGMENT_FILE_EXT`, zero-padded base-offset file
//! names, `existing_offsets` scanning the directory) follow
//! `repo/fs.rs::Fs` fairly closely; the actual I/O path here is `memmap2`
//! rather than the teacher's `BufWriter`, since the append/recovery split in
//! this crate benefits from random-access reads over the whole segment.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::error::SegmentError;

pub const SEGMENT_FILE_EXT: &str = ".clog";

/// A fixed-capacity, randomly-addressable span of bytes backing one segment
/// file (§3 "Segment").
pub trait Segment: Send + Sync {
    fn base_offset(&self) -> u64;
    fn capacity(&self) -> u64;
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()>;
    /// Flush dirty pages to disk. Async Flush / Commit services call this;
    /// a failure here is the one data-path condition this crate panics on
    /// (§7 "fatal conditions").
    fn sync(&self) -> io::Result<()>;
    /// Preheating handoff hook (§4.3 supplement): called after the Append
    /// Engine releases the put lock, so a segment that preloaded pages can
    /// release them. Default no-op; `MmapSegment` doesn't need it since the
    /// OS page cache already serves this role, but the hook exists for
    /// implementations that do their own preheating.
    fn on_appended(&self, _offset: u64, _len: usize) {}
}

pub trait SegmentStore: Send + Sync {
    type Seg: Segment;

    fn create_segment(&self, base_offset: u64, capacity: u64) -> Result<Self::Seg, SegmentError>;
    fn open_segment(&self, base_offset: u64) -> Result<Self::Seg, SegmentError>;
    fn remove_segment(&self, base_offset: u64) -> Result<(), SegmentError>;
    /// Base offsets of segments on disk, ascending.
    fn existing_offsets(&self) -> Result<Vec<u64>, SegmentError>;
}

/// `memmap2`-backed segment: one fixed-size file, fully mapped.
///
/// The whole mapping lives behind one `RwLock` rather than per-page
/// synchronization: writers (the Append Engine, one at a time under the put
/// lock) take the write guard only for the duration of a single `write_at`,
/// readers (recovery scan, replication ingress) take the read guard. This
/// trades a little write/read contention for not having to reason about
/// concurrent aliased access into the mapping by hand.
pub struct MmapSegment {
    base_offset: u64,
    capacity: u64,
    file: File,
    mmap: RwLock<MmapMut>,
}

impl MmapSegment {
    fn open(path: &Path, base_offset: u64, capacity: u64, create: bool) -> Result<Self, SegmentError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)
            .map_err(|source| SegmentError::Create { offset: base_offset, source })?;
        if create {
            file.set_len(capacity)?;
        }
        // SAFETY: `file` is exclusively owned by this `MmapSegment` for its
        // lifetime; no other process is expected to hold the segment file
        // open for writing concurrently.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(MmapSegment {
            base_offset,
            capacity,
            file,
            mmap: RwLock::new(mmap),
        })
    }
}

impl Segment for MmapSegment {
    fn base_offset(&self) -> u64 {
        self.base_offset
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let guard = self.mmap.read();
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= guard.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past segment end"))?;
        Ok(guard[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.mmap.write();
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&e| e <= guard.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "write past segment end"))?;
        guard[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.mmap.read().flush()?;
        self.file.sync_all()
    }
}

pub struct FsSegmentStore {
    root: PathBuf,
}

impl FsSegmentStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FsSegmentStore { root })
    }

    fn path_for(&self, base_offset: u64) -> PathBuf {
        self.root.join(format!("{base_offset:020}{SEGMENT_FILE_EXT}"))
    }
}

impl SegmentStore for FsSegmentStore {
    type Seg = MmapSegment;

    fn create_segment(&self, base_offset: u64, capacity: u64) -> Result<Self::Seg, SegmentError> {
        MmapSegment::open(&self.path_for(base_offset), base_offset, capacity, true)
    }

    fn open_segment(&self, base_offset: u64) -> Result<Self::Seg, SegmentError> {
        let path = self.path_for(base_offset);
        if !path.exists() {
            return Err(SegmentError::NotFound { offset: base_offset });
        }
        let capacity = fs::metadata(&path)?.len();
        MmapSegment::open(&path, base_offset, capacity, false)
    }

    fn remove_segment(&self, base_offset: u64) -> Result<(), SegmentError> {
        fs::remove_file(self.path_for(base_offset)).map_err(SegmentError::from)
    }

    fn existing_offsets(&self) -> Result<Vec<u64>, SegmentError> {
        let mut offsets = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(SEGMENT_FILE_EXT) {
                if let Ok(offset) = stem.parse::<u64>() {
                    offsets.push(offset);
                }
            }
        }
        offsets.sort_unstable();
        Ok(offsets)
    }
}

/// In-memory segment, for unit tests that exercise append/recovery logic
/// without touching the filesystem.
pub struct MemSegment {
    base_offset: u64,
    capacity: u64,
    data: RwLock<Vec<u8>>,
}

impl Segment for MemSegment {
    fn base_offset(&self) -> u64 {
        self.base_offset
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past segment end"))?;
        Ok(data[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&e| e <= data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "write past segment end"))?;
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemSegmentStore {
    segments: Mutex<HashMap<u64, u64>>,
    /// Segment contents live outside `segments` keyed the same way, wrapped
    /// separately so `open_segment` can hand out a fresh `MemSegment`
    /// sharing the same backing bytes.
    backing: Mutex<HashMap<u64, std::sync::Arc<RwLock<Vec<u8>>>>>,
}

impl MemSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for MemSegmentStore {
    type Seg = MemSegmentHandle;

    fn create_segment(&self, base_offset: u64, capacity: u64) -> Result<Self::Seg, SegmentError> {
        let mut segments = self.segments.lock().unwrap();
        if segments.contains_key(&base_offset) {
            return Err(SegmentError::Create {
                offset: base_offset,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "segment exists"),
            });
        }
        segments.insert(base_offset, capacity);
        let buf = std::sync::Arc::new(RwLock::new(vec![0u8; capacity as usize]));
        self.backing.lock().unwrap().insert(base_offset, buf.clone());
        Ok(MemSegmentHandle { base_offset, capacity, data: buf })
    }

    fn open_segment(&self, base_offset: u64) -> Result<Self::Seg, SegmentError> {
        let capacity = *self
            .segments
            .lock()
            .unwrap()
            .get(&base_offset)
            .ok_or(SegmentError::NotFound { offset: base_offset })?;
        let buf = self.backing.lock().unwrap().get(&base_offset).unwrap().clone();
        Ok(MemSegmentHandle { base_offset, capacity, data: buf })
    }

    fn remove_segment(&self, base_offset: u64) -> Result<(), SegmentError> {
        self.segments.lock().unwrap().remove(&base_offset);
        self.backing.lock().unwrap().remove(&base_offset);
        Ok(())
    }

    fn existing_offsets(&self) -> Result<Vec<u64>, SegmentError> {
        let mut offsets: Vec<u64> = self.segments.lock().unwrap().keys().copied().collect();
        offsets.sort_unstable();
        Ok(offsets)
    }
}

pub struct MemSegmentHandle {
    base_offset: u64,
    capacity: u64,
    data: std::sync::Arc<RwLock<Vec<u8>>>,
}

impl Segment for MemSegmentHandle {
    fn base_offset(&self) -> u64 {
        self.base_offset
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past segment end"))?;
        Ok(data[start..end].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .filter(|&e| e <= data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "write past segment end"))?;
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}
