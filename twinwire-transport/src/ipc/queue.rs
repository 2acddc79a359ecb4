//! Bounded multi-process message queue over a shared segment.

use super::lock::SegmentLock;
use super::shm::{Geometry, Segment, SegmentHeader, default_segment_dir};
use super::wait::{futex_wait, futex_wake};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use twinwire_core::{Message, MessengerError, Received, Result};

/// Create/attach attempts before giving up on a contended name.
const OPEN_ATTEMPTS: usize = 3;

/// Yields before a waiting queue parks on the futex.
const WAIT_YIELDS: u32 = 16;

/// Longest a waiting queue blocks its thread before yielding to the runtime.
const PARK_SLICE: Duration = Duration::from_millis(1);

/// Maximum length of a segment name.
pub const MAX_NAME_LEN: usize = 255;

fn default_lock_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Configuration for the shared-memory queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Name of the shared segment. Queues with the same name share a channel.
    pub shared_memory_name: String,
    /// Maximum payload size in bytes.
    pub max_message_size: usize,
    /// Number of slots in the queue.
    pub max_queue_size: usize,
    /// Capacity of one slot in bytes (an encoded frame must fit).
    pub max_buffer_size: usize,
    /// Directory holding segment files. Defaults to `/dev/shm` or the temp dir.
    #[serde(default)]
    pub segment_dir: Option<PathBuf>,
    /// Bound on waiting for the segment lock or a peer's initialization.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            shared_memory_name: "twinwire".to_string(),
            max_message_size: 1024,
            max_queue_size: 1024,
            max_buffer_size: 1024,
            segment_dir: None,
            lock_timeout: default_lock_timeout(),
        }
    }
}

impl IpcConfig {
    /// Creates a new config for the named segment.
    #[must_use]
    pub fn new(shared_memory_name: impl Into<String>) -> Self {
        Self {
            shared_memory_name: shared_memory_name.into(),
            ..Default::default()
        }
    }

    /// Sets the maximum payload size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the number of queue slots.
    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the slot capacity.
    #[must_use]
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Sets the segment directory.
    #[must_use]
    pub fn segment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segment_dir = Some(dir.into());
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Returns the backing file path of the configured segment.
    #[must_use]
    pub fn segment_path(&self) -> PathBuf {
        let dir = self
            .segment_dir
            .clone()
            .unwrap_or_else(default_segment_dir);
        Segment::path_for(&dir, &self.shared_memory_name)
    }

    /// Checks that the configuration is well-formed.
    ///
    /// # Errors
    /// Returns `InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let name = &self.shared_memory_name;
        if name.is_empty() {
            return Err(MessengerError::invalid_argument(
                "shared_memory_name must not be empty",
            ));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(MessengerError::invalid_argument(format!(
                "shared_memory_name longer than {MAX_NAME_LEN} bytes"
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
            || name.starts_with('.')
        {
            return Err(MessengerError::invalid_argument(format!(
                "shared_memory_name {name:?} may only contain [A-Za-z0-9._-] and must not start with '.'"
            )));
        }
        if self.max_message_size == 0 {
            return Err(MessengerError::invalid_argument(
                "max_message_size must be positive",
            ));
        }
        if self.max_queue_size == 0 || self.max_queue_size > u32::MAX as usize {
            return Err(MessengerError::invalid_argument(format!(
                "max_queue_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.max_buffer_size == 0 || self.max_buffer_size > Geometry::MAX_FRAME {
            return Err(MessengerError::invalid_argument(format!(
                "max_buffer_size must be between 1 and {}",
                Geometry::MAX_FRAME
            )));
        }
        if self.lock_timeout.is_zero() {
            return Err(MessengerError::invalid_argument(
                "lock_timeout must be positive",
            ));
        }
        self.geometry()?.segment_size()?;
        Ok(())
    }

    fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.max_queue_size, self.max_buffer_size)
    }
}

/// Snapshot of the queue indices, checked against the slot count.
struct QueueState {
    head: u64,
    tail: u64,
    count: u64,
}

impl QueueState {
    /// Loads the indices. Must be called with the lock held.
    fn load(header: &SegmentHeader, slot_count: u64) -> Result<Self> {
        let state = Self {
            head: header.head.load(Ordering::Relaxed),
            tail: header.tail.load(Ordering::Relaxed),
            count: header.count.load(Ordering::Relaxed),
        };
        let consistent = state.head < slot_count
            && state.tail < slot_count
            && state.count <= slot_count
            && (state.head + state.count) % slot_count == state.tail;
        if !consistent {
            tracing::warn!(
                "Corrupt queue state: head {}, tail {}, count {}, slots {}",
                state.head,
                state.tail,
                state.count,
                slot_count
            );
            return Err(MessengerError::internal(format!(
                "corrupt queue state: head {}, tail {}, count {}, slots {slot_count}",
                state.head, state.tail, state.count
            )));
        }
        Ok(state)
    }
}

/// FIFO queue of framed messages shared by every process that opens the
/// same segment name.
///
/// Send and receive never block on queue state: a full queue fails with
/// `SendFailed` and an empty one with `NoMessages`. The only wait is the
/// bounded wait for the segment lock.
pub struct SharedQueue {
    config: IpcConfig,
    segment: Option<Segment>,
    path: PathBuf,
    creator: bool,
    attached: bool,
}

impl SharedQueue {
    /// Creates the named segment, or attaches to it if it already exists.
    ///
    /// # Errors
    /// - `InvalidArgument` if the config is malformed.
    /// - `MemoryAllocation` if the segment cannot be created or mapped.
    /// - `ConnectionFailed` if an existing segment cannot be attached.
    /// - `Timeout` if the segment lock cannot be taken.
    pub fn open(config: IpcConfig) -> Result<Self> {
        config.validate()?;

        let geometry = config.geometry()?;
        let path = config.segment_path();

        for attempt in 0..OPEN_ATTEMPTS {
            // A created segment already counts this queue as attached.
            if let Some(segment) = Segment::create(&path, geometry)? {
                tracing::info!(
                    "Created shared queue {} ({} slots of {} bytes)",
                    path.display(),
                    geometry.slot_count,
                    geometry.slot_size
                );
                return Ok(Self::new(config, segment, path, true));
            }

            if let Some(segment) = Segment::open(&path, geometry, config.lock_timeout)? {
                if attach(&segment, config.lock_timeout)? {
                    tracing::info!("Attached to shared queue {}", path.display());
                    return Ok(Self::new(config, segment, path, false));
                }
                tracing::debug!(
                    "Shared queue {} is being destroyed, retrying (attempt {})",
                    path.display(),
                    attempt + 1
                );
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        Err(MessengerError::connection_failed(format!(
            "could not create or attach {} after {OPEN_ATTEMPTS} attempts",
            path.display()
        )))
    }

    fn new(config: IpcConfig, segment: Segment, path: PathBuf, creator: bool) -> Self {
        Self {
            config,
            segment: Some(segment),
            path,
            creator,
            attached: true,
        }
    }

    fn segment(&self) -> Result<&Segment> {
        match &self.segment {
            Some(segment) if self.attached => Ok(segment),
            _ => Err(MessengerError::invalid_argument("shared queue is detached")),
        }
    }

    /// Enqueues a message without waiting for space.
    ///
    /// # Errors
    /// - `MessageTooLarge` if the payload exceeds `max_message_size` or the
    ///   frame exceeds `max_buffer_size`. Nothing is written.
    /// - `SendFailed` if the queue is full. Queue state is unchanged.
    /// - `Timeout` if the lock cannot be taken.
    /// - `Internal` if the shared indices are corrupt.
    pub fn try_send(&mut self, message: &Message) -> Result<()> {
        let segment = self.segment()?;

        // Encode outside the lock
        let mut frame = BytesMut::new();
        twinwire_core::encode_frame_into(message, self.config.max_message_size, &mut frame)?;

        // Validate against slot capacity
        if frame.len() > segment.geometry().max_frame() {
            return Err(MessengerError::message_too_large(
                frame.len(),
                segment.geometry().max_frame(),
            ));
        }

        let header = segment.header();
        let slot_count = segment.geometry().slot_count;
        let slot = {
            let _guard = SegmentLock::acquire(&header.lock, self.config.lock_timeout)?;
            let state = QueueState::load(header, slot_count)?;

            // Full queue: reject without touching state
            if state.count == slot_count {
                return Err(MessengerError::send_failed(format!(
                    "queue full ({slot_count} messages)"
                )));
            }

            // Copy into the tail slot, then publish it
            segment.write_slot(state.tail, &frame);
            header
                .tail
                .store((state.tail + 1) % slot_count, Ordering::Relaxed);
            header.count.store(state.count + 1, Ordering::Relaxed);
            state.tail
        };
        notify(header, &header.not_empty_seq);

        tracing::debug!(
            "Enqueued {} bytes on topic {:?} into slot {}",
            frame.len(),
            message.topic(),
            slot
        );
        Ok(())
    }

    /// Dequeues the oldest message without waiting.
    ///
    /// # Errors
    /// - `NoMessages` if the queue is empty. Queue state is unchanged.
    /// - `Timeout` if the lock cannot be taken.
    /// - `Internal` if the shared state or the slot is corrupt. A corrupt slot
    ///   is still consumed.
    /// - Frame decoding errors (`InvalidArgument`, `MessageTooLarge`).
    pub fn try_recv(&mut self) -> Result<Message> {
        let segment = self.segment()?;
        let header = segment.header();
        let slot_count = segment.geometry().slot_count;

        let frame = {
            let _guard = SegmentLock::acquire(&header.lock, self.config.lock_timeout)?;
            let state = QueueState::load(header, slot_count)?;

            if state.count == 0 {
                return Err(MessengerError::NoMessages);
            }

            // Consume the slot even if its contents are corrupt.
            let frame = segment.read_slot(state.head);
            header
                .head
                .store((state.head + 1) % slot_count, Ordering::Relaxed);
            header.count.store(state.count - 1, Ordering::Relaxed);
            frame
        };
        notify(header, &header.not_full_seq);
        let frame = frame?;

        // Decode outside the lock
        twinwire_core::decode_frame_bytes(Bytes::from(frame), self.config.max_message_size)
    }

    /// Dequeues the oldest message into caller buffers.
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if either buffer is too small; the message is
    /// consumed regardless. Otherwise as [`try_recv`](Self::try_recv).
    pub fn try_recv_into(&mut self, topic_out: &mut [u8], payload_out: &mut [u8]) -> Result<Received> {
        self.try_recv()?.copy_into(topic_out, payload_out)
    }

    /// Enqueues a message, waiting up to `timeout` for a free slot.
    ///
    /// # Errors
    /// Returns `Timeout` if the queue stays full; otherwise as
    /// [`try_send`](Self::try_send).
    pub async fn send_timeout(&mut self, message: &Message, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.signal(|h| &h.not_full_seq)?;
            match self.try_send(message) {
                Err(MessengerError::SendFailed { .. }) => self.wait_not_full(seen, deadline).await?,
                other => return other,
            }
        }
    }

    /// Dequeues a message, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    /// Returns `Timeout` if the queue stays empty; otherwise as
    /// [`try_recv`](Self::try_recv).
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.signal(|h| &h.not_empty_seq)?;
            match self.try_recv() {
                Err(MessengerError::NoMessages) => self.wait_not_empty(seen, deadline).await?,
                other => return other,
            }
        }
    }

    /// Waits until the not-empty signal moves past `seen`.
    ///
    /// # Errors
    /// Returns `Timeout` once `deadline` passes.
    pub async fn wait_not_empty(&self, seen: u32, deadline: Instant) -> Result<()> {
        self.wait_signal(|h| &h.not_empty_seq, seen, deadline, "shared queue receive")
            .await
    }

    /// Waits until the not-full signal moves past `seen`.
    ///
    /// # Errors
    /// Returns `Timeout` once `deadline` passes.
    pub async fn wait_not_full(&self, seen: u32, deadline: Instant) -> Result<()> {
        self.wait_signal(|h| &h.not_full_seq, seen, deadline, "shared queue send")
            .await
    }

    fn signal(&self, select: impl Fn(&SegmentHeader) -> &AtomicU32) -> Result<u32> {
        Ok(select(self.segment()?.header()).load(Ordering::Acquire))
    }

    /// Yields a few times, then parks on the counter's futex in short slices
    /// so that the runtime still gets to run other tasks between them.
    async fn wait_signal(
        &self,
        select: impl Fn(&SegmentHeader) -> &AtomicU32,
        seen: u32,
        deadline: Instant,
        operation: &'static str,
    ) -> Result<()> {
        let mut polls = 0u32;
        loop {
            if self.signal(&select)? != seen {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MessengerError::timeout(operation));
            }
            polls += 1;
            if polls < WAIT_YIELDS {
                tokio::task::yield_now().await;
                continue;
            }

            let header = self.segment()?.header();
            let seq = select(header);

            // Register before the re-check so a sender bumping the counter
            // in between either sees us waiting or makes the futex return.
            header.waiters.fetch_add(1, Ordering::SeqCst);
            let parked = if seq.load(Ordering::SeqCst) == seen {
                futex_wait(seq, seen, PARK_SLICE.min(deadline - now))
            } else {
                Ok(())
            };
            header.waiters.fetch_sub(1, Ordering::SeqCst);
            parked?;

            tokio::task::yield_now().await;
        }
    }

    /// Returns the number of queued messages.
    ///
    /// # Errors
    /// Returns `InvalidArgument` once detached.
    pub fn len(&self) -> Result<usize> {
        Ok(self.segment()?.header().count.load(Ordering::Acquire) as usize)
    }

    /// Returns true if no messages are queued.
    ///
    /// # Errors
    /// Returns `InvalidArgument` once detached.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.max_queue_size
    }

    /// Returns the number of queues attached to the segment.
    ///
    /// # Errors
    /// Returns `InvalidArgument` once detached.
    pub fn attached(&self) -> Result<u32> {
        Ok(self.segment()?.header().attached.load(Ordering::Acquire))
    }

    /// Returns true if this queue created the segment.
    #[must_use]
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Returns true while attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    /// Detaches from the segment without destroying it.
    ///
    /// Later operations fail with `InvalidArgument`. Calling this again is a
    /// no-op.
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;

        if let Some(segment) = &self.segment {
            let header = segment.header();
            // The lock orders this against a concurrent destroy; the count
            // itself is atomic, so it still drops if the lock is stuck.
            let guard = SegmentLock::acquire(&header.lock, self.config.lock_timeout);
            if let Err(e) = &guard {
                tracing::warn!("Detaching from {} without lock: {}", self.path.display(), e);
            }
            let _ = header
                .attached
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            drop(guard);
        }

        // Only the creator keeps its mapping, to decide on destruction later.
        if !self.creator {
            self.segment = None;
        }
        tracing::info!("Detached from shared queue {}", self.path.display());
    }

    /// Detaches and releases the mapping. If this queue created the segment
    /// and no queue is attached anymore, the segment is destroyed.
    ///
    /// Calling this again is a no-op.
    pub fn free(&mut self) {
        self.detach();

        let Some(segment) = self.segment.take() else {
            return;
        };

        // Creator path: destroy only once nobody is attached
        let header = segment.header();
        let _guard = match SegmentLock::acquire(&header.lock, self.config.lock_timeout) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Leaving shared queue {} in place: {}", self.path.display(), e);
                return;
            }
        };

        if header.attached.load(Ordering::Acquire) == 0
            && header.destroyed.load(Ordering::Relaxed) == 0
        {
            header.destroyed.store(1, Ordering::Relaxed);
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::info!("Destroyed shared queue {}", self.path.display()),
                Err(e) => {
                    tracing::warn!("Cannot remove shared queue {}: {}", self.path.display(), e)
                }
            }
        }
    }
}

impl Drop for SharedQueue {
    fn drop(&mut self) {
        self.free();
    }
}

/// Registers one more attachment. Returns `false` if the segment has been
/// destroyed and must not be used.
fn attach(segment: &Segment, timeout: Duration) -> Result<bool> {
    let header = segment.header();
    let _guard = SegmentLock::acquire(&header.lock, timeout)?;
    if header.destroyed.load(Ordering::Relaxed) != 0 {
        return Ok(false);
    }
    header.attached.fetch_add(1, Ordering::AcqRel);
    Ok(true)
}

/// Bumps a signal counter and wakes any queue parked on it.
fn notify(header: &SegmentHeader, seq: &AtomicU32) {
    seq.fetch_add(1, Ordering::SeqCst);
    if header.waiters.load(Ordering::SeqCst) == 0 {
        return;
    }
    if let Err(e) = futex_wake(seq) {
        tracing::warn!("Cannot wake shared queue waiters: {}", e);
    }
}
