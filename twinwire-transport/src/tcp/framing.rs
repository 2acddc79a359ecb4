//! Message framing codec for TCP.
//!
//! Frames use the same layout as the shared queue:
//! `[topic_len u16 LE][topic][payload_len u32 LE][payload]`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use twinwire_core::{Message, MessengerError, decode_frame_bytes, encode_frame_into, peek_frame_len};

/// Codec turning a byte stream into [`Message`]s and back.
///
/// The decoder reassembles frames split across reads and leaves any bytes of
/// the next frame buffered.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_message_size: usize,
}

impl FrameCodec {
    /// Creates a codec accepting payloads of up to `max_message_size` bytes.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Returns the maximum payload size.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = MessengerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need both length fields before the frame size is known
        let Some(len) = peek_frame_len(src, self.max_message_size)? else {
            return Ok(None);
        };

        // Check if we have the complete frame
        if src.len() < len {
            // Reserve space for the rest of the frame
            src.reserve(len - src.len());
            return Ok(None);
        }

        // Extract the frame, leaving any following bytes buffered
        let frame = src.split_to(len).freeze();
        decode_frame_bytes(frame, self.max_message_size).map(Some)
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = MessengerError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Size checks run before anything is written to dst
        encode_frame_into(item, self.max_message_size, dst)
    }
}
