//! Inter-process ticket lock over words in shared memory.
//!
//! Waiters draw a ticket from `next` and enter in ticket order. The `word`
//! packs the ticket being served (high half) with the holder's pid (low
//! half, zero while nobody holds it), so claiming and releasing are single
//! compare-exchanges.
//!
//! A waiter that gives up leaves its ticket behind. Followers that find the
//! lock free but stuck on the same ticket for [`STALL_GRACE`] skip past it.
//! A holder whose process no longer exists is skipped the same way.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use twinwire_core::{MessengerError, Result};

/// Busy-wait iterations before yielding the CPU.
const SPIN_LIMIT: u32 = 64;

/// How long the served ticket may sit unchanged before it is skipped.
pub const STALL_GRACE: Duration = Duration::from_millis(5);

/// Lock words embedded in a segment header.
#[repr(C)]
#[derive(Debug, Default)]
pub struct LockState {
    next: AtomicU32,
    _reserved: AtomicU32,
    word: AtomicU64,
}

const fn pack(serving: u32, holder: u32) -> u64 {
    ((serving as u64) << 32) | holder as u64
}

const fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

impl LockState {
    /// Creates an unlocked state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            _reserved: AtomicU32::new(0),
            word: AtomicU64::new(0),
        }
    }

    /// Returns the pid of the current holder, or `None` if it is free.
    #[must_use]
    pub fn holder(&self) -> Option<u32> {
        match unpack(self.word.load(Ordering::Acquire)).1 {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Returns how many tickets are drawn but not yet served.
    #[must_use]
    pub fn queued(&self) -> u32 {
        let (serving, _) = unpack(self.word.load(Ordering::Acquire));
        self.next.load(Ordering::Acquire).wrapping_sub(serving)
    }

    /// Marks the lock as held by `pid` at the current ticket.
    #[cfg(test)]
    pub(crate) fn seize(&self, pid: u32) {
        let (serving, _) = unpack(self.word.load(Ordering::Acquire));
        self.next.store(serving.wrapping_add(1), Ordering::Release);
        self.word.store(pack(serving, pid), Ordering::Release);
    }

    /// Releases a lock taken with [`seize`](Self::seize).
    #[cfg(test)]
    pub(crate) fn unseize(&self) {
        let (serving, _) = unpack(self.word.load(Ordering::Acquire));
        self.word
            .store(pack(serving.wrapping_add(1), 0), Ordering::Release);
    }
}

/// Guard for a [`LockState`] living in a shared segment.
///
/// The lock is released when the guard is dropped.
pub struct SegmentLock<'a> {
    state: &'a LockState,
    ticket: u32,
}

impl<'a> SegmentLock<'a> {
    /// Acquires the lock, waiting at most `timeout`.
    ///
    /// Spins briefly, then yields between attempts so that other attached
    /// processes get to run.
    ///
    /// # Errors
    /// Returns `Timeout` if this waiter's turn has not come when `timeout`
    /// elapses.
    pub fn acquire(state: &'a LockState, timeout: Duration) -> Result<Self> {
        let owner = std::process::id().max(1);
        let start = Instant::now();
        let mut ticket = state.next.fetch_add(1, Ordering::AcqRel);
        let mut spins = 0u32;
        let mut stalled: Option<(u64, Instant)> = None;

        loop {
            let current = state.word.load(Ordering::Acquire);
            let (serving, holder) = unpack(current);

            // Our turn and free: claim it.
            if serving == ticket && holder == 0 {
                if state
                    .word
                    .compare_exchange(current, pack(ticket, owner), Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(Self { state, ticket });
                }
                continue;
            }

            // Skipped while descheduled: queue up again.
            if (serving.wrapping_sub(ticket) as i32) > 0 {
                ticket = state.next.fetch_add(1, Ordering::AcqRel);
                continue;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }

            if start.elapsed() >= timeout {
                tracing::warn!(
                    "Shared queue lock held by pid {} (serving ticket {}, ours {}) for over {:?}",
                    holder,
                    serving,
                    ticket,
                    timeout
                );
                return Err(MessengerError::timeout("shared queue lock"));
            }

            match stalled {
                Some((seen, since)) if seen == current => {
                    if since.elapsed() >= STALL_GRACE {
                        if holder == 0 || !process_alive(holder) {
                            skip(state, current, serving, holder);
                        }
                        stalled = None;
                    }
                }
                _ => stalled = Some((current, Instant::now())),
            }
            std::thread::yield_now();
        }
    }

    /// Returns the ticket this guard holds.
    #[must_use]
    pub fn ticket(&self) -> u32 {
        self.ticket
    }
}

impl Drop for SegmentLock<'_> {
    fn drop(&mut self) {
        self.state
            .word
            .store(pack(self.ticket.wrapping_add(1), 0), Ordering::Release);
    }
}

fn skip(state: &LockState, current: u64, serving: u32, holder: u32) {
    let advanced = state
        .word
        .compare_exchange(
            current,
            pack(serving.wrapping_add(1), 0),
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .is_ok();
    if !advanced {
        return;
    }
    if holder == 0 {
        tracing::debug!("Skipped abandoned shared queue lock ticket {}", serving);
    } else {
        tracing::warn!(
            "Recovered shared queue lock from exited pid {} (ticket {})",
            holder,
            serving
        );
    }
}

/// Returns false only if `pid` is known not to exist.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    // Signal 0 checks existence without delivering anything. EPERM means the
    // process exists under another user.
    let res = unsafe { libc::kill(pid, 0) };
    res == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use twinwire_core::ErrorKind;

    fn exited_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_release() {
        let state = LockState::new();
        {
            let guard = SegmentLock::acquire(&state, Duration::from_millis(10)).unwrap();
            assert_eq!(guard.ticket(), 0);
            assert_eq!(state.holder(), Some(std::process::id().max(1)));
        }
        assert_eq!(state.holder(), None);

        let guard = SegmentLock::acquire(&state, Duration::from_millis(10)).unwrap();
        assert_eq!(guard.ticket(), 1);
    }

    #[test]
    fn test_acquire_timeout() {
        let state = LockState::new();
        state.seize(std::process::id());

        let start = Instant::now();
        let err = SegmentLock::acquire(&state, Duration::from_millis(20))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(state.holder(), Some(std::process::id()));
    }

    #[test]
    fn test_abandoned_ticket_is_skipped() {
        let state = LockState::new();
        state.seize(std::process::id());

        // Times out and leaves ticket 1 behind.
        SegmentLock::acquire(&state, Duration::from_millis(5))
            .err()
            .unwrap();
        state.unseize();
        assert_eq!(state.queued(), 1);

        let guard = SegmentLock::acquire(&state, Duration::from_secs(1)).unwrap();
        assert_eq!(guard.ticket(), 2);
    }

    #[test]
    fn test_recovers_from_exited_holder() {
        let state = LockState::new();
        state.seize(exited_pid());

        let guard = SegmentLock::acquire(&state, Duration::from_secs(1)).unwrap();
        assert_eq!(guard.ticket(), 1);
        assert_eq!(state.holder(), Some(std::process::id().max(1)));
    }

    #[test]
    fn test_waiters_enter_in_ticket_order() {
        let state = Arc::new(LockState::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = SegmentLock::acquire(&state, Duration::from_secs(1)).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let thread_state = Arc::clone(&state);
                let order = Arc::clone(&order);
                let handle = std::thread::spawn(move || {
                    let guard = SegmentLock::acquire(&thread_state, Duration::from_secs(5)).unwrap();
                    order.lock().unwrap().push((guard.ticket(), i));
                });
                // Let this thread draw its ticket before the next one starts.
                while state.queued() < i + 2 {
                    std::thread::yield_now();
                }
                handle
            })
            .collect();
        drop(guard);

        for handle in handles {
            handle.join().unwrap();
        }
        let order = order.lock().unwrap();
        let threads: Vec<u32> = order.iter().map(|&(_, i)| i).collect();
        assert_eq!(threads, vec![0, 1, 2]);
    }

    #[test]
    fn test_mutual_exclusion() {
        let state = Arc::new(LockState::new());
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = SegmentLock::acquire(&state, Duration::from_secs(5)).unwrap();
                        // Non-atomic read-modify-write, only correct under the lock.
                        let value = counter.load(Ordering::Relaxed);
                        counter.store(value + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}
