//! Topic-addressed message type.

use crate::error::{MessengerError, Result};
use bytes::Bytes;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 1024;

/// A single message: a topic label plus an opaque payload.
///
/// Messages are immutable once built. The payload limit depends on the
/// transport configuration and is enforced when the message is framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Bytes,
}

impl Message {
    /// Creates a new message.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the topic is longer than [`MAX_TOPIC_LEN`].
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self> {
        let topic = topic.into();
        check_topic_len(topic.len())?;
        Ok(Self {
            topic,
            payload: payload.into(),
        })
    }

    /// Returns the topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Splits the message into topic and payload.
    #[must_use]
    pub fn into_parts(self) -> (String, Bytes) {
        (self.topic, self.payload)
    }

    /// Copies topic and payload into caller-owned buffers.
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if either buffer is shorter than the data it
    /// must hold. Nothing is copied in that case.
    pub fn copy_into(&self, topic_out: &mut [u8], payload_out: &mut [u8]) -> Result<Received> {
        let topic = self.topic.as_bytes();
        if topic_out.len() < topic.len() {
            return Err(MessengerError::buffer_too_small(
                topic.len(),
                topic_out.len(),
            ));
        }
        if payload_out.len() < self.payload.len() {
            return Err(MessengerError::buffer_too_small(
                self.payload.len(),
                payload_out.len(),
            ));
        }

        topic_out[..topic.len()].copy_from_slice(topic);
        payload_out[..self.payload.len()].copy_from_slice(&self.payload);

        Ok(Received {
            topic_len: topic.len(),
            payload_len: self.payload.len(),
        })
    }
}

/// Sizes written by a receive into caller buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Topic bytes written.
    pub topic_len: usize,
    /// Payload bytes written.
    pub payload_len: usize,
}

pub(crate) fn check_topic_len(len: usize) -> Result<()> {
    if len > MAX_TOPIC_LEN {
        return Err(MessengerError::invalid_argument(format!(
            "topic length {len} exceeds maximum {MAX_TOPIC_LEN}"
        )));
    }
    Ok(())
}
