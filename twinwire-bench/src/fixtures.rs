//! Benchmark inputs.

use bytes::Bytes;
use std::path::Path;
use twinwire_core::{Message, Result};
use twinwire_transport::IpcConfig;

/// Payload sizes exercised by the benchmarks.
pub const PAYLOAD_SIZES: [usize; 4] = [16, 256, 1024, 16 * 1024];

/// Builds a message on topic `bench` with a payload of `size` bytes.
///
/// # Errors
/// Propagates message construction errors.
pub fn sample_message(size: usize) -> Result<Message> {
    let payload: Bytes = (0..size).map(|i| (i % 251) as u8).collect();
    Message::new("bench", payload)
}

/// Queue configuration sized for `payload_size` payloads, placed in `dir`.
#[must_use]
pub fn ipc_config(dir: &Path, name: &str, slots: usize, payload_size: usize) -> IpcConfig {
    IpcConfig::new(name)
        .segment_dir(dir)
        .max_queue_size(slots)
        .max_message_size(payload_size)
        .max_buffer_size(twinwire_core::frame_len(5, payload_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_message() {
        let message = sample_message(300).unwrap();
        assert_eq!(message.topic(), "bench");
        assert_eq!(message.payload().len(), 300);
        assert_eq!(message.payload()[251], 0);
    }

    #[test]
    fn test_ipc_config_fits_frame() {
        let config = ipc_config(Path::new("/tmp"), "b", 8, 1024);
        let frame = twinwire_core::encode_frame(&sample_message(1024).unwrap(), 1024).unwrap();
        assert_eq!(frame.len(), config.max_buffer_size);
        assert!(config.validate().is_ok());
    }
}
