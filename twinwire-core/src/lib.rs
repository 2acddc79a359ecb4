//! # twinwire Core
//!
//! Core types shared by every twinwire transport.
//!
//! This crate provides:
//! - [`error`] - The closed error taxonomy and its integer codes
//! - [`message`] - Topic-addressed messages
//! - [`frame`] - The length-prefixed frame format used by both transports

pub mod error;
pub mod frame;
pub mod message;

pub use error::{ErrorKind, MessengerError, Result};
pub use frame::{
    FRAME_OVERHEAD, decode_frame, decode_frame_bytes, encode_frame, encode_frame_into, frame_len,
    peek_frame_len,
};
pub use message::{MAX_TOPIC_LEN, Message, Received};
