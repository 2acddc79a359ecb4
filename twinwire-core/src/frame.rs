//! Length-prefixed frame encoding shared by every transport.
//!
//! # Wire Format
//! ```text
//! +0:     topic_length    (u16 LE)
//! +2:     topic           (topic_length bytes, UTF-8)
//! +2+T:   payload_length  (u32 LE)
//! +6+T:   payload         (payload_length bytes)
//! ```

use crate::error::{MessengerError, Result};
use crate::message::{MAX_TOPIC_LEN, Message, check_topic_len};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the topic length prefix.
pub const TOPIC_LEN_SIZE: usize = 2;

/// Size of the payload length prefix.
pub const PAYLOAD_LEN_SIZE: usize = 4;

/// Fixed per-frame overhead in bytes.
pub const FRAME_OVERHEAD: usize = TOPIC_LEN_SIZE + PAYLOAD_LEN_SIZE;

/// Returns the encoded size of a frame.
#[inline]
#[must_use]
pub const fn frame_len(topic_len: usize, payload_len: usize) -> usize {
    FRAME_OVERHEAD + topic_len + payload_len
}

/// Encodes a message into a new buffer.
///
/// # Errors
/// Returns `MessageTooLarge` if the payload exceeds `max_message_size`.
pub fn encode_frame(message: &Message, max_message_size: usize) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_frame_into(message, max_message_size, &mut dst)?;
    Ok(dst.freeze())
}

/// Appends the encoded frame of `message` to `dst`.
///
/// Validation happens before anything is written, so `dst` is unchanged on
/// error.
///
/// # Errors
/// Returns `MessageTooLarge` if the payload exceeds `max_message_size`, or
/// `InvalidArgument` if the topic is too long.
pub fn encode_frame_into(message: &Message, max_message_size: usize, dst: &mut BytesMut) -> Result<()> {
    let topic = message.topic().as_bytes();
    let payload = message.payload();

    check_topic_len(topic.len())?;
    let max = max_message_size.min(u32::MAX as usize);
    if payload.len() > max {
        return Err(MessengerError::message_too_large(payload.len(), max));
    }

    dst.reserve(frame_len(topic.len(), payload.len()));
    dst.put_u16_le(topic.len() as u16);
    dst.put_slice(topic);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);

    Ok(())
}

/// Inspects the start of `buf` and returns the full frame length once the
/// header is readable.
///
/// # Returns
/// `Ok(None)` while the header is incomplete, `Ok(Some(len))` otherwise.
/// `len` may be larger than `buf.len()`.
///
/// # Errors
/// Returns `InvalidArgument` for an oversize topic and `MessageTooLarge` for
/// an oversize payload.
pub fn peek_frame_len(buf: &[u8], max_message_size: usize) -> Result<Option<usize>> {
    match read_header(buf, max_message_size)? {
        Some((topic_len, payload_len)) => Ok(Some(frame_len(topic_len, payload_len))),
        None => Ok(None),
    }
}

/// Decodes a complete frame.
///
/// # Errors
/// - `InvalidArgument` if the declared lengths do not match the bytes in
///   `frame`, or the topic is too long or not UTF-8.
/// - `MessageTooLarge` if the payload exceeds `max_message_size`.
pub fn decode_frame(frame: &[u8], max_message_size: usize) -> Result<Message> {
    decode_frame_bytes(Bytes::copy_from_slice(frame), max_message_size)
}

/// Decodes a complete frame without copying the payload.
///
/// # Errors
/// Same as [`decode_frame`].
pub fn decode_frame_bytes(frame: Bytes, max_message_size: usize) -> Result<Message> {
    let (topic_len, payload_len) = read_header(&frame, max_message_size)?
        .ok_or_else(|| MessengerError::invalid_argument("truncated frame header"))?;

    let total = frame_len(topic_len, payload_len);
    if frame.len() < total {
        return Err(MessengerError::invalid_argument(format!(
            "frame declares {total} bytes but only {} are available",
            frame.len()
        )));
    }
    if frame.len() > total {
        return Err(MessengerError::invalid_argument(format!(
            "{} trailing bytes after frame",
            frame.len() - total
        )));
    }

    let topic_bytes = &frame[TOPIC_LEN_SIZE..TOPIC_LEN_SIZE + topic_len];
    let topic = std::str::from_utf8(topic_bytes)
        .map_err(|e| MessengerError::invalid_argument(format!("topic is not UTF-8: {e}")))?;
    let payload = frame.slice(FRAME_OVERHEAD + topic_len..total);

    Message::new(topic, payload)
}

fn read_header(buf: &[u8], max_message_size: usize) -> Result<Option<(usize, usize)>> {
    if buf.len() < TOPIC_LEN_SIZE {
        return Ok(None);
    }

    let topic_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if topic_len > MAX_TOPIC_LEN {
        return Err(MessengerError::invalid_argument(format!(
            "topic length {topic_len} exceeds maximum {MAX_TOPIC_LEN}"
        )));
    }

    let at = TOPIC_LEN_SIZE + topic_len;
    if buf.len() < at + PAYLOAD_LEN_SIZE {
        return Ok(None);
    }

    let payload_len =
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize;
    if payload_len > max_message_size {
        return Err(MessengerError::message_too_large(
            payload_len,
            max_message_size,
        ));
    }

    Ok(Some((topic_len, payload_len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn msg(topic: &str, payload: &'static [u8]) -> Message {
        Message::new(topic, payload).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame(&msg("ab", b"xyz"), 64).unwrap();
        assert_eq!(frame.len(), frame_len(2, 3));
        assert_eq!(&frame[..2], &2u16.to_le_bytes());
        assert_eq!(&frame[2..4], b"ab");
        assert_eq!(&frame[4..8], &3u32.to_le_bytes());
        assert_eq!(&frame[8..], b"xyz");
    }

    #[test]
    fn test_encode_decode() {
        let original = msg("alerts", b"payload1");
        let frame = encode_frame(&original, 1024).unwrap();
        let decoded = decode_frame(&frame, 1024).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_decode_empty() {
        let original = msg("", b"");
        let frame = encode_frame(&original, 0).unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
        assert_eq!(decode_frame(&frame, 0).unwrap(), original);
    }

    #[test]
    fn test_encode_too_large_writes_nothing() {
        let mut dst = BytesMut::new();
        let err = encode_frame_into(&msg("t", b"0123456789"), 4, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            MessengerError::MessageTooLarge { size: 10, max: 4 }
        ));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_decode_payload_too_large() {
        let frame = encode_frame(&msg("t", b"0123456789"), 64).unwrap();
        let err = decode_frame(&frame, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);
    }

    #[test]
    fn test_decode_truncated() {
        let frame = encode_frame(&msg("topic", b"data"), 64).unwrap();

        for cut in [0, 1, 3, 8, frame.len() - 1] {
            let err = decode_frame(&frame[..cut], 64).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut buf = BytesMut::new();
        encode_frame_into(&msg("t", b"a"), 64, &mut buf).unwrap();
        buf.put_u8(0xFF);
        let err = decode_frame(&buf, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_decode_invalid_utf8_topic() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        buf.put_slice(&[0xC3, 0x28]);
        buf.put_u32_le(0);
        let err = decode_frame(&buf, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_decode_topic_too_long() {
        let mut buf = BytesMut::new();
        buf.put_u16_le((MAX_TOPIC_LEN + 1) as u16);
        let err = decode_frame(&buf, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_peek_frame_len() {
        let frame = encode_frame(&msg("abc", b"hello"), 64).unwrap();

        assert_eq!(peek_frame_len(&frame[..1], 64).unwrap(), None);
        assert_eq!(peek_frame_len(&frame[..5], 64).unwrap(), None);
        assert_eq!(peek_frame_len(&frame[..9], 64).unwrap(), Some(frame.len()));
        assert_eq!(peek_frame_len(&frame, 64).unwrap(), Some(frame.len()));

        let err = peek_frame_len(&frame, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);
    }
}
