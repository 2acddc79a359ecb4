//! Cross-process wait and wake on a shared counter.
//!
//! On Linux this is a futex on the counter's address, which works across
//! processes mapping the same file. Elsewhere waiting degrades to a sleep.

use std::sync::atomic::AtomicU32;
use std::time::Duration;
use twinwire_core::Result;

/// Blocks while `*addr == expected`, for at most `timeout`.
///
/// Returns early on a wake, a signal, or if the value already differs.
///
/// # Errors
/// Returns `Internal` if the syscall fails for another reason.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Duration) -> Result<()> {
    use libc::{EAGAIN, EINTR, ETIMEDOUT, FUTEX_WAIT, SYS_futex, syscall, timespec};

    let ts = timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    let res = unsafe {
        syscall(
            SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            &ts as *const timespec,
            std::ptr::null::<u32>(),
            0,
        )
    };
    if res == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == EAGAIN || code == EINTR || code == ETIMEDOUT => Ok(()),
        _ => Err(err.into()),
    }
}

/// Wakes every waiter blocked on `addr`.
///
/// # Errors
/// Returns `Internal` if the syscall fails.
#[cfg(target_os = "linux")]
pub fn futex_wake(addr: &AtomicU32) -> Result<()> {
    use libc::{FUTEX_WAKE, SYS_futex, syscall};

    let res = unsafe {
        syscall(
            SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<u32>(),
            std::ptr::null::<u32>(),
            0,
        )
    };
    if res < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_addr: &AtomicU32, _expected: u32, timeout: Duration) -> Result<()> {
    std::thread::sleep(timeout);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_addr: &AtomicU32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let word = AtomicU32::new(1);
        let start = Instant::now();
        futex_wait(&word, 0, Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        futex_wait(&word, 0, Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || {
                let start = Instant::now();
                while word.load(Ordering::Acquire) == 0 {
                    futex_wait(&word, 0, Duration::from_secs(5)).unwrap();
                }
                start.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        word.store(1, Ordering::Release);
        futex_wake(&word).unwrap();
        assert!(waiter.join().unwrap() < Duration::from_secs(2));
    }
}
