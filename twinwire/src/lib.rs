//! # twinwire
//!
//! Topic-addressed point-to-point messaging over interchangeable transports.
//!
//! A [`Messenger`] is configured with exactly one transport and offers the
//! same operations over both:
//!
//! - **IPC** - a bounded FIFO in a named shared-memory segment, for processes
//!   on the same host
//! - **TCP** - a framed stream to one peer, for processes on different hosts
//!
//! Both transports carry the same frame:
//! `[topic_len u16 LE][topic][payload_len u32 LE][payload]`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use twinwire::prelude::*;
//!
//! # async fn run() -> twinwire::Result<()> {
//! let mut messenger = Messenger::connect(TcpConfig::new("127.0.0.1", 9000)).await?;
//! messenger.send("alerts", &b"payload1"[..]).await?;
//!
//! match messenger.receive().await {
//!     Ok(message) => println!("{}: {:?}", message.topic(), message.payload()),
//!     Err(e) if e.is_no_messages() => {}
//!     Err(e) => return Err(e),
//! }
//! messenger.free().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Errors, messages, and the frame format
//! - [`transport`] - The shared-queue and TCP engines
//! - [`config`] - Transport selection
//! - [`messenger`] - The messenger handle and its lifecycle

pub mod config;
pub mod messenger;
pub mod prelude;

/// Errors, messages, and the frame format.
pub mod core {
    pub use twinwire_core::*;
}

/// Transport engines.
pub mod transport {
    pub use twinwire_transport::*;
}

pub use config::{Config, IpcConfig, TcpConfig, TcpMode, TransportConfig};
pub use messenger::{Messenger, MessengerState};
pub use twinwire_core::{ErrorKind, Message, MessengerError, Received, Result};
