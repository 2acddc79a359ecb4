//! Messenger configuration.
//!
//! A messenger is bound to exactly one transport for its lifetime.
//! [`TransportConfig`] is that choice as a closed sum type. [`Config`] is the
//! looser document shape with one optional section per transport, as it
//! would appear in a configuration file; converting it fails unless exactly
//! one section is present.

use serde::{Deserialize, Serialize};
use twinwire_core::{MessengerError, Result};

pub use twinwire_transport::ipc::IpcConfig;
pub use twinwire_transport::tcp::{TcpConfig, TcpMode};

/// Transport selection for a messenger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportConfig {
    /// Shared-memory queue on this host.
    Ipc(IpcConfig),
    /// TCP connection to (or from) a peer.
    Tcp(TcpConfig),
}

impl TransportConfig {
    /// Checks the selected transport's configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Ipc(config) => config.validate(),
            Self::Tcp(config) => config.validate(),
        }
    }

    /// Returns the maximum payload size of the selected transport.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::Ipc(config) => config.max_message_size,
            Self::Tcp(config) => config.max_message_size,
        }
    }

    /// Returns a short name for the selected transport.
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Ipc(_) => "ipc",
            Self::Tcp(_) => "tcp",
        }
    }
}

impl From<IpcConfig> for TransportConfig {
    fn from(config: IpcConfig) -> Self {
        Self::Ipc(config)
    }
}

impl From<TcpConfig> for TransportConfig {
    fn from(config: TcpConfig) -> Self {
        Self::Tcp(config)
    }
}

/// Configuration document with one optional section per transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Shared-memory settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc: Option<IpcConfig>,
    /// TCP settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpConfig>,
}

impl Config {
    /// Creates an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shared-memory section.
    #[must_use]
    pub fn ipc(mut self, config: IpcConfig) -> Self {
        self.ipc = Some(config);
        self
    }

    /// Sets the TCP section.
    #[must_use]
    pub fn tcp(mut self, config: TcpConfig) -> Self {
        self.tcp = Some(config);
        self
    }
}

impl TryFrom<Config> for TransportConfig {
    type Error = MessengerError;

    fn try_from(config: Config) -> Result<Self> {
        match (config.ipc, config.tcp) {
            (Some(ipc), None) => Ok(Self::Ipc(ipc)),
            (None, Some(tcp)) => Ok(Self::Tcp(tcp)),
            (Some(_), Some(_)) => Err(MessengerError::invalid_argument(
                "config selects both ipc and tcp transports",
            )),
            (None, None) => Err(MessengerError::invalid_argument(
                "config selects no transport",
            )),
        }
    }
}

impl From<TransportConfig> for Config {
    fn from(config: TransportConfig) -> Self {
        match config {
            TransportConfig::Ipc(ipc) => Self::new().ipc(ipc),
            TransportConfig::Tcp(tcp) => Self::new().tcp(tcp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use twinwire_core::ErrorKind;

    #[test]
    fn test_try_from_single_section() {
        let ipc = TransportConfig::try_from(Config::new().ipc(IpcConfig::new("ch1"))).unwrap();
        assert_eq!(ipc.transport_name(), "ipc");

        let tcp =
            TransportConfig::try_from(Config::new().tcp(TcpConfig::new("localhost", 9000))).unwrap();
        assert_eq!(tcp.transport_name(), "tcp");
        assert_eq!(tcp.max_message_size(), 64 * 1024);
    }

    #[test]
    fn test_try_from_both_or_neither() {
        let both = Config::new()
            .ipc(IpcConfig::default())
            .tcp(TcpConfig::default());
        let err = TransportConfig::try_from(both).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = TransportConfig::try_from(Config::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_validate_dispatches() {
        assert!(TransportConfig::from(IpcConfig::new("ok")).validate().is_ok());

        let err = TransportConfig::from(IpcConfig::new(""))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = TransportConfig::from(TcpConfig::new("localhost", 0))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "ipc": {
                "shared_memory_name": "ch1",
                "max_message_size": 1024,
                "max_queue_size": 1024,
                "max_buffer_size": 1024
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let TransportConfig::Ipc(ipc) = TransportConfig::try_from(config).unwrap() else {
            panic!("expected ipc");
        };
        assert_eq!(ipc.shared_memory_name, "ch1");
        assert_eq!(ipc.segment_dir, None);
        assert_eq!(ipc.lock_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_tcp_config_from_json_defaults() {
        let json = r#"{"tcp": {"host": "10.0.0.1", "port": 7000, "max_message_size": 4096, "mode": "accept"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let tcp = config.tcp.unwrap();
        assert_eq!(tcp.mode, TcpMode::Accept);
        assert_eq!(tcp.read_timeout, Duration::from_secs(5));
        assert!(tcp.tcp_nodelay);
        assert_eq!(tcp.send_buffer_size, None);
    }

    #[test]
    fn test_transport_config_serde_round_trip() {
        let config = TransportConfig::from(
            IpcConfig::new("orders")
                .max_queue_size(16)
                .segment_dir("/tmp/twinwire"),
        );
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.starts_with(r#"{"ipc":"#));
        let back: TransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let loose = Config::from(back);
        assert!(loose.tcp.is_none());
        assert_eq!(TransportConfig::try_from(loose).unwrap(), config);
    }
}
