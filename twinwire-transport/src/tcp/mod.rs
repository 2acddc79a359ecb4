//! TCP transport module.
//!
//! Provides framed point-to-point TCP connections, either connecting to a
//! peer or accepting one.

pub mod connection;
pub mod framing;

pub use connection::{TcpAcceptor, TcpConfig, TcpConnection, TcpMode};
pub use framing::FrameCodec;
