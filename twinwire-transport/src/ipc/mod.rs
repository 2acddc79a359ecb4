//! Shared-memory transport.
//!
//! Processes on one host exchange messages through a named, file-backed
//! segment holding a bounded FIFO of framed messages.

pub mod lock;
pub mod queue;
pub mod shm;
pub mod wait;

pub use lock::{LockState, SegmentLock};
pub use queue::{IpcConfig, MAX_NAME_LEN, SharedQueue};
pub use shm::{Geometry, Segment, SegmentHeader, default_segment_dir};
