//! Queue throughput measurement.

use std::time::{Duration, Instant};
use twinwire_core::{Message, Result};
use twinwire_transport::SharedQueue;

/// Result of a throughput run.
#[derive(Debug, Clone)]
pub struct ThroughputResult {
    /// Messages moved through the queue.
    pub messages: u64,
    /// Payload bytes moved through the queue.
    pub bytes: u64,
    /// Wall time of the run.
    pub duration: Duration,
}

impl ThroughputResult {
    /// Returns messages per second.
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        self.messages as f64 / self.duration.as_secs_f64()
    }

    /// Returns megabytes of payload per second.
    #[must_use]
    pub fn mb_per_second(&self) -> f64 {
        self.bytes as f64 / self.duration.as_secs_f64() / (1024.0 * 1024.0)
    }
}

/// Pushes `count` copies of `message` through `queue`, filling it and
/// draining it in turn.
///
/// # Errors
/// Returns the first queue error other than a full or empty queue.
pub fn fill_drain(queue: &mut SharedQueue, message: &Message, count: u64) -> Result<ThroughputResult> {
    let start = Instant::now();
    let mut sent = 0u64;
    let mut received = 0u64;

    while received < count {
        while sent < count {
            match queue.try_send(message) {
                Ok(()) => sent += 1,
                Err(e) if e.kind() == twinwire_core::ErrorKind::SendFailed => break,
                Err(e) => return Err(e),
            }
        }
        loop {
            match queue.try_recv() {
                Ok(_) => received += 1,
                Err(e) if e.is_no_messages() => break,
                Err(e) => return Err(e),
            }
        }
    }

    Ok(ThroughputResult {
        messages: count,
        bytes: count * message.payload().len() as u64,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ipc_config, sample_message};

    #[test]
    fn test_throughput_result_rates() {
        let result = ThroughputResult {
            messages: 1000,
            bytes: 1024 * 1024,
            duration: Duration::from_secs(1),
        };
        assert!((result.messages_per_second() - 1000.0).abs() < 0.001);
        assert!((result.mb_per_second() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_fill_drain_moves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SharedQueue::open(ipc_config(dir.path(), "fill", 4, 64)).unwrap();

        let result = fill_drain(&mut queue, &sample_message(64).unwrap(), 10).unwrap();
        assert_eq!(result.messages, 10);
        assert_eq!(result.bytes, 640);
        assert!(queue.is_empty().unwrap());
    }
}
