//! Named shared-memory segments.
//!
//! A segment is a file-backed mapping: a fixed-layout [`SegmentHeader`]
//! followed by `slot_count` slots of `slot_size` bytes each. Every process
//! that maps the same file sees the same header and slots.

use super::lock::LockState;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use twinwire_core::{MessengerError, Result};

/// Magic number identifying a twinwire segment ('TWQ1').
pub const SEGMENT_MAGIC: u32 = 0x5457_5131;

/// Layout version of the segment header.
pub const SEGMENT_VERSION: u32 = 2;

/// File extension of segment backing files.
pub const SEGMENT_EXTENSION: &str = "twq";

const INIT_READY: u32 = 2;

/// Control block at the start of every segment.
///
/// All fields are atomics because the block is shared with other processes.
/// Queue fields (`head`, `tail`, `count`, `destroyed`) are only mutated while
/// `lock` is held. `attached` is only changed by atomic read-modify-write.
#[repr(C)]
pub struct SegmentHeader {
    /// Segment magic, [`SEGMENT_MAGIC`] once initialized.
    pub magic: AtomicU32,
    /// Layout version.
    pub version: AtomicU32,
    /// Initialization state, ready once the creator has written the header.
    pub init_state: AtomicU32,
    /// Non-zero once the creator has torn the segment down.
    pub destroyed: AtomicU32,
    /// Number of attached queues.
    pub attached: AtomicU32,
    /// Bumped on every enqueue.
    pub not_empty_seq: AtomicU32,
    /// Bumped on every dequeue.
    pub not_full_seq: AtomicU32,
    /// Number of queues parked on one of the signal counters.
    pub waiters: AtomicU32,
    /// Ticket lock guarding the queue fields.
    pub lock: LockState,
    /// Number of slots.
    pub slot_count: AtomicU64,
    /// Bytes per slot, including the slot length prefix.
    pub slot_size: AtomicU64,
    /// Index of the oldest message.
    pub head: AtomicU64,
    /// Index of the next free slot.
    pub tail: AtomicU64,
    /// Number of queued messages.
    pub count: AtomicU64,
    _pad: [u8; 40],
}

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == Segment::HEADER_SIZE);

/// Slot geometry of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Number of slots.
    pub slot_count: u64,
    /// Bytes per slot, including the slot length prefix.
    pub slot_size: u64,
}

impl Geometry {
    /// Size of the per-slot length prefix.
    pub const SLOT_PREFIX: usize = 4;

    /// Largest frame a slot can record behind its `u32` length prefix.
    pub const MAX_FRAME: usize = u32::MAX as usize - Self::SLOT_PREFIX;

    /// Creates the geometry for `slot_count` slots holding frames of up to
    /// `max_frame` bytes.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `max_frame` exceeds [`MAX_FRAME`](Self::MAX_FRAME).
    pub fn new(slot_count: usize, max_frame: usize) -> Result<Self> {
        if max_frame > Self::MAX_FRAME {
            return Err(MessengerError::invalid_argument(format!(
                "slot capacity {max_frame} exceeds {} bytes",
                Self::MAX_FRAME
            )));
        }
        let slot_size = max_frame
            .checked_add(Self::SLOT_PREFIX)
            .and_then(|size| u64::try_from(size).ok())
            .ok_or_else(|| MessengerError::invalid_argument("slot size overflows"))?;
        let slot_count = u64::try_from(slot_count)
            .map_err(|_| MessengerError::invalid_argument("slot count overflows"))?;
        Ok(Self {
            slot_count,
            slot_size,
        })
    }

    /// Total size of a segment with this geometry.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the size overflows.
    pub fn segment_size(&self) -> Result<usize> {
        self.slot_count
            .checked_mul(self.slot_size)
            .and_then(|slots| slots.checked_add(Segment::HEADER_SIZE as u64))
            .and_then(|total| usize::try_from(total).ok())
            .ok_or_else(|| MessengerError::invalid_argument("segment size overflows"))
    }

    /// Largest frame a slot can hold.
    #[must_use]
    pub fn max_frame(&self) -> usize {
        usize::try_from(self.slot_size)
            .unwrap_or(usize::MAX)
            .saturating_sub(Self::SLOT_PREFIX)
            .min(Self::MAX_FRAME)
    }
}

/// A mapped segment.
pub struct Segment {
    mmap: MmapMut,
    base: *mut u8,
    path: PathBuf,
    geometry: Geometry,
}

// SAFETY: `base` points into `mmap`, which the segment owns. The mapping does
// not move when the segment moves. Header fields are atomics and slot memory
// is only touched while the header lock is held.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Size of the control block header in bytes.
    pub const HEADER_SIZE: usize = 128;

    /// Returns the backing file path for segment `name` inside `dir`.
    #[must_use]
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{SEGMENT_EXTENSION}"))
    }

    /// Creates a new segment, failing over to `Ok(None)` if one already
    /// exists at `path`.
    ///
    /// The new segment is published with one attachment, held by the caller.
    ///
    /// # Errors
    /// Returns `MemoryAllocation` if the file cannot be created, sized, or
    /// mapped.
    pub fn create(path: &Path, geometry: Geometry) -> Result<Option<Self>> {
        let size = geometry.segment_size()?;

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(MessengerError::memory_allocation(format!(
                    "cannot create segment {}: {e}",
                    path.display()
                )));
            }
        };

        let mapped = file
            .set_len(size as u64)
            .and_then(|()| unsafe { MmapOptions::new().len(size).map_mut(&file) });
        let mut mmap = match mapped {
            Ok(mmap) => mmap,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(MessengerError::memory_allocation(format!(
                    "cannot map segment {} ({size} bytes): {e}",
                    path.display()
                )));
            }
        };

        let base = mmap.as_mut_ptr();
        let segment = Self {
            mmap,
            base,
            path: path.to_path_buf(),
            geometry,
        };

        // A fresh file is zero-filled, so queue state starts empty. The
        // creator counts as attached before anyone else can see the header.
        let header = segment.header();
        header.slot_count.store(geometry.slot_count, Ordering::Relaxed);
        header.slot_size.store(geometry.slot_size, Ordering::Relaxed);
        header.attached.store(1, Ordering::Relaxed);
        header.version.store(SEGMENT_VERSION, Ordering::Relaxed);
        header.magic.store(SEGMENT_MAGIC, Ordering::Relaxed);
        header.init_state.store(INIT_READY, Ordering::Release);

        Ok(Some(segment))
    }

    /// Attaches to an existing segment, returning `Ok(None)` if no file
    /// exists at `path`.
    ///
    /// Waits up to `timeout` for the creator to finish initializing.
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the segment never becomes ready, is not a
    /// twinwire segment, or its geometry differs from `geometry`.
    pub fn open(path: &Path, geometry: Geometry, timeout: Duration) -> Result<Option<Self>> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MessengerError::connection_failed(format!(
                    "cannot open segment {}: {e}",
                    path.display()
                )));
            }
        };

        let deadline = Instant::now() + timeout;
        let len = wait_for_size(&file, path, deadline)?;

        let mut mmap = unsafe { MmapOptions::new().len(len).map_mut(&file) }.map_err(|e| {
            MessengerError::connection_failed(format!(
                "cannot map segment {}: {e}",
                path.display()
            ))
        })?;

        let base = mmap.as_mut_ptr();
        let segment = Self {
            mmap,
            base,
            path: path.to_path_buf(),
            geometry,
        };
        segment.wait_ready(deadline)?;
        segment.verify(geometry, len)?;

        Ok(Some(segment))
    }

    fn wait_ready(&self, deadline: Instant) -> Result<()> {
        let header = self.header();
        while header.init_state.load(Ordering::Acquire) != INIT_READY {
            if Instant::now() >= deadline {
                return Err(MessengerError::connection_failed(format!(
                    "segment {} was never initialized",
                    self.path.display()
                )));
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn verify(&self, geometry: Geometry, len: usize) -> Result<()> {
        let header = self.header();
        if header.magic.load(Ordering::Acquire) != SEGMENT_MAGIC {
            return Err(MessengerError::connection_failed(format!(
                "{} is not a twinwire segment",
                self.path.display()
            )));
        }
        let version = header.version.load(Ordering::Acquire);
        if version != SEGMENT_VERSION {
            return Err(MessengerError::connection_failed(format!(
                "segment version {version}, expected {SEGMENT_VERSION}"
            )));
        }

        let existing = Geometry {
            slot_count: header.slot_count.load(Ordering::Acquire),
            slot_size: header.slot_size.load(Ordering::Acquire),
        };
        if existing != geometry {
            return Err(MessengerError::connection_failed(format!(
                "segment {} has {} slots of {} bytes, expected {} slots of {} bytes",
                self.path.display(),
                existing.slot_count,
                existing.slot_size,
                geometry.slot_count,
                geometry.slot_size
            )));
        }
        if geometry.segment_size()? != len {
            return Err(MessengerError::connection_failed(format!(
                "segment {} is {len} bytes, expected {}",
                self.path.display(),
                geometry.segment_size()?
            )));
        }
        Ok(())
    }

    /// Returns the control block.
    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        unsafe { &*(self.base as *const SegmentHeader) }
    }

    /// Returns the slot geometry.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the mapped size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Writes `frame` into slot `index` behind its length prefix.
    ///
    /// The caller must hold the segment lock, have checked
    /// `index < slot_count`, and `frame.len() <= geometry().max_frame()`.
    pub(crate) fn write_slot(&self, index: u64, frame: &[u8]) {
        debug_assert!(index < self.geometry.slot_count);
        debug_assert!(frame.len() <= self.geometry.max_frame());

        let offset = self.slot_offset(index);
        let len = (frame.len() as u32).to_le_bytes();
        unsafe {
            let dst = self.base.add(offset);
            std::ptr::copy_nonoverlapping(len.as_ptr(), dst, Geometry::SLOT_PREFIX);
            std::ptr::copy_nonoverlapping(
                frame.as_ptr(),
                dst.add(Geometry::SLOT_PREFIX),
                frame.len(),
            );
        }
    }

    /// Copies the frame stored in slot `index`.
    ///
    /// The caller must hold the segment lock and have checked
    /// `index < slot_count`.
    ///
    /// # Errors
    /// Returns `Internal` if the recorded length does not fit the slot.
    pub(crate) fn read_slot(&self, index: u64) -> Result<Vec<u8>> {
        debug_assert!(index < self.geometry.slot_count);

        let offset = self.slot_offset(index);
        let mut len = [0u8; Geometry::SLOT_PREFIX];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.add(offset),
                len.as_mut_ptr(),
                Geometry::SLOT_PREFIX,
            );
        }
        let len = u32::from_le_bytes(len) as usize;
        if len > self.geometry.max_frame() {
            return Err(MessengerError::internal(format!(
                "slot {index} records {len} bytes, capacity is {}",
                self.geometry.max_frame()
            )));
        }

        let mut frame = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.add(offset + Geometry::SLOT_PREFIX),
                frame.as_mut_ptr(),
                len,
            );
        }
        Ok(frame)
    }

    fn slot_offset(&self, index: u64) -> usize {
        Self::HEADER_SIZE + (index * self.geometry.slot_size) as usize
    }
}

fn wait_for_size(file: &File, path: &Path, deadline: Instant) -> Result<usize> {
    loop {
        let len = file
            .metadata()
            .map_err(|e| {
                MessengerError::connection_failed(format!(
                    "cannot stat segment {}: {e}",
                    path.display()
                ))
            })?
            .len() as usize;
        if len >= Segment::HEADER_SIZE {
            return Ok(len);
        }
        if Instant::now() >= deadline {
            return Err(MessengerError::connection_failed(format!(
                "segment {} is {len} bytes, too small for a header",
                path.display()
            )));
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}

/// Returns the directory used for segments when none is configured.
///
/// `/dev/shm` on Linux when available, otherwise the OS temp directory.
#[must_use]
pub fn default_segment_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}
