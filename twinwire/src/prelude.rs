//! Prelude module for convenient imports.
//!
//! ```ignore
//! use twinwire::prelude::*;
//! ```

pub use crate::config::{Config, IpcConfig, TcpConfig, TcpMode, TransportConfig};
pub use crate::messenger::{Messenger, MessengerState};
pub use twinwire_core::{ErrorKind, Message, MessengerError, Received};
pub use twinwire_transport::Transport;
