//! The messenger: one handle, one transport, one lifecycle.

use crate::config::{Config, TcpMode, TransportConfig};
use bytes::Bytes;
use std::time::Duration;
use twinwire_core::{Message, MessengerError, Received, Result};
use twinwire_transport::{SharedQueue, TcpAcceptor, TcpConnection, Transport};

/// Lifecycle state of a [`Messenger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessengerState {
    /// Configured but not started.
    Uninitialized,
    /// Transport is up; messages can flow.
    Initialized,
    /// Transport resources released.
    CleanedUp,
    /// Handle released; every operation fails.
    Freed,
}

impl std::fmt::Display for MessengerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::CleanedUp => write!(f, "cleaned up"),
            Self::Freed => write!(f, "freed"),
        }
    }
}

enum Engine {
    Ipc(SharedQueue),
    Tcp(TcpConnection),
}

impl Engine {
    async fn open(config: &TransportConfig) -> Result<Self> {
        match config {
            TransportConfig::Ipc(ipc) => SharedQueue::open(ipc.clone()).map(Self::Ipc),
            TransportConfig::Tcp(tcp) => match tcp.mode {
                TcpMode::Connect => TcpConnection::connect(tcp.clone()).await.map(Self::Tcp),
                TcpMode::Accept => {
                    let acceptor = TcpAcceptor::bind(tcp.clone()).await?;
                    acceptor.accept().await.map(Self::Tcp)
                }
            },
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        match self {
            Self::Ipc(queue) => queue.send(message).await,
            Self::Tcp(connection) => Transport::send(connection, message).await,
        }
    }

    async fn receive(&mut self) -> Result<Message> {
        match self {
            Self::Ipc(queue) => queue.receive().await,
            Self::Tcp(connection) => Transport::receive(connection).await,
        }
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        match self {
            Self::Ipc(queue) => queue.receive_timeout(timeout).await,
            Self::Tcp(connection) => Transport::receive_timeout(connection, timeout).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Ipc(queue) => Transport::close(queue).await,
            Self::Tcp(connection) => Transport::close(connection).await,
        }
    }

    async fn free(self) {
        match self {
            Self::Ipc(mut queue) => queue.free(),
            Self::Tcp(mut connection) => Transport::close(&mut connection).await,
        }
    }
}

/// A topic-addressed messenger bound to one transport.
///
/// The same calls work over the shared-memory queue and over TCP. Receiving
/// does not wait: with nothing available it fails with `NoMessages`. Use
/// [`receive_timeout`](Self::receive_timeout) to wait for a message.
///
/// # Example
///
/// ```no_run
/// use twinwire::prelude::*;
///
/// # async fn run() -> twinwire::Result<()> {
/// let mut messenger = Messenger::connect(IpcConfig::new("ch1")).await?;
/// messenger.send("t", &b"a"[..]).await?;
/// let message = messenger.receive().await?;
/// assert_eq!(message.topic(), "t");
/// messenger.free().await;
/// # Ok(())
/// # }
/// ```
pub struct Messenger {
    config: TransportConfig,
    state: MessengerState,
    engine: Option<Engine>,
}

impl Messenger {
    /// Creates an uninitialized messenger.
    #[must_use]
    pub fn new(config: impl Into<TransportConfig>) -> Self {
        Self {
            config: config.into(),
            state: MessengerState::Uninitialized,
            engine: None,
        }
    }

    /// Creates an uninitialized messenger from a configuration document.
    ///
    /// # Errors
    /// Returns `InvalidArgument` unless exactly one transport is configured.
    pub fn from_config(config: Config) -> Result<Self> {
        TransportConfig::try_from(config).map(Self::new)
    }

    /// Creates and initializes a messenger.
    ///
    /// # Errors
    /// As [`init`](Self::init).
    pub async fn connect(config: impl Into<TransportConfig>) -> Result<Self> {
        let mut messenger = Self::new(config);
        messenger.init().await?;
        Ok(messenger)
    }

    /// Validates the configuration and brings the transport up.
    ///
    /// For IPC this creates or attaches to the named segment. For TCP this
    /// connects to the peer, or accepts one peer in accept mode.
    ///
    /// # Errors
    /// - `InvalidArgument` if the configuration is malformed or the messenger
    ///   is not uninitialized.
    /// - Transport errors (`MemoryAllocation`, `ConnectionFailed`, `Timeout`)
    ///   unchanged. The messenger stays uninitialized and `init` can be
    ///   retried.
    pub async fn init(&mut self) -> Result<()> {
        if self.state != MessengerState::Uninitialized {
            return Err(MessengerError::invalid_argument(format!(
                "cannot initialize a messenger that is {}",
                self.state
            )));
        }
        self.config.validate()?;

        let engine = Engine::open(&self.config).await?;
        self.engine = Some(engine);
        self.state = MessengerState::Initialized;

        tracing::info!(
            "Messenger initialized over {}",
            self.config.transport_name()
        );
        Ok(())
    }

    fn engine(&mut self) -> Result<&mut Engine> {
        match (self.state, self.engine.as_mut()) {
            (MessengerState::Initialized, Some(engine)) => Ok(engine),
            (state, _) => Err(MessengerError::invalid_argument(format!(
                "messenger is {state}"
            ))),
        }
    }

    /// Sends `payload` on `topic`.
    ///
    /// # Errors
    /// - `InvalidArgument` if the messenger is not initialized or the topic is
    ///   too long.
    /// - `MessageTooLarge` if the payload exceeds `max_message_size`. Nothing
    ///   is written.
    /// - `SendFailed` if the queue is full or the socket fails, `Timeout` if a
    ///   bounded wait expires.
    pub async fn send(&mut self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.engine()?;
        let message = Message::new(topic, payload)?;
        self.send_message(&message).await
    }

    /// Sends a prepared message.
    ///
    /// # Errors
    /// As [`send`](Self::send).
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        self.engine()?.send(message).await
    }

    /// Receives one message if one is available.
    ///
    /// # Errors
    /// - `InvalidArgument` if the messenger is not initialized.
    /// - `NoMessages` if nothing is available.
    /// - `Timeout` if a partially received TCP frame is not completed in time.
    /// - `ReceiveFailed` if the TCP peer went away.
    pub async fn receive(&mut self) -> Result<Message> {
        self.engine()?.receive().await
    }

    /// Receives one message into caller buffers.
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if either buffer is too small; the message is
    /// consumed regardless. Otherwise as [`receive`](Self::receive).
    pub async fn receive_into(
        &mut self,
        topic_out: &mut [u8],
        payload_out: &mut [u8],
    ) -> Result<Received> {
        self.receive().await?.copy_into(topic_out, payload_out)
    }

    /// Waits up to `timeout` for one message.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing arrives in time, otherwise as
    /// [`receive`](Self::receive).
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.engine()?.receive_timeout(timeout).await
    }

    /// Releases transport resources: detaches from the shared segment or
    /// closes the TCP connection. Does nothing unless initialized.
    pub async fn cleanup(&mut self) {
        if self.state != MessengerState::Initialized {
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.close().await;
        }
        self.state = MessengerState::CleanedUp;
        tracing::info!("Messenger over {} cleaned up", self.config.transport_name());
    }

    /// Releases the handle. Cleans up first if needed; a shared segment is
    /// destroyed if this messenger created it and nothing else is attached.
    ///
    /// Every later operation fails with `InvalidArgument`.
    pub async fn free(&mut self) {
        if self.state == MessengerState::Freed {
            return;
        }
        self.cleanup().await;
        if let Some(engine) = self.engine.take() {
            engine.free().await;
        }
        self.state = MessengerState::Freed;
        tracing::debug!("Messenger over {} freed", self.config.transport_name());
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> MessengerState {
        self.state
    }

    /// Returns the transport configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the maximum payload size.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.config.max_message_size()
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        match self.engine.take() {
            Some(Engine::Ipc(mut queue)) => queue.free(),
            Some(Engine::Tcp(connection)) => {
                if connection.is_open() {
                    tracing::debug!(
                        "Dropping open connection to {}",
                        connection.peer_addr()
                    );
                }
            }
            None => {}
        }
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("transport", &self.config.transport_name())
            .field("state", &self.state)
            .finish()
    }
}
