//! # twinwire Transport
//!
//! Transport engines behind the twinwire messenger.
//!
//! This crate provides:
//! - [`ipc`] - Bounded message queue in a named shared-memory segment
//! - [`tcp`] - Framed point-to-point TCP connections
//! - [`Transport`] - The operations both engines have in common

pub mod ipc;
pub mod tcp;
pub mod transport;

pub use ipc::{IpcConfig, SharedQueue};
pub use tcp::{TcpAcceptor, TcpConfig, TcpConnection, TcpMode};
pub use transport::Transport;
