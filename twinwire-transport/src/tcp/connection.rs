//! Framed TCP connections.

use super::framing::FrameCodec;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::poll_fn;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use twinwire_core::{Message, MessengerError, Received, Result};

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_nodelay() -> bool {
    true
}

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    /// Connect to `host:port`.
    #[default]
    Connect,
    /// Listen on `host:port` and accept a single peer.
    Accept,
}

/// Configuration for a TCP connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Peer host name or address (bind address in accept mode).
    pub host: String,
    /// Peer port (listen port in accept mode).
    pub port: u16,
    /// Maximum payload size in bytes.
    pub max_message_size: usize,
    /// Connect or accept.
    #[serde(default)]
    pub mode: TcpMode,
    /// Bound on establishing the connection.
    #[serde(default = "default_timeout")]
    pub connect_timeout: Duration,
    /// Bound on completing a partially received frame.
    #[serde(default = "default_timeout")]
    pub read_timeout: Duration,
    /// Bound on writing one frame.
    #[serde(default = "default_timeout")]
    pub write_timeout: Duration,
    /// Enable TCP_NODELAY.
    #[serde(default = "default_nodelay")]
    pub tcp_nodelay: bool,
    /// Socket receive buffer size.
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
    /// Socket send buffer size.
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            max_message_size: 64 * 1024,
            mode: TcpMode::Connect,
            connect_timeout: default_timeout(),
            read_timeout: default_timeout(),
            write_timeout: default_timeout(),
            tcp_nodelay: true,
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

impl TcpConfig {
    /// Creates a new config for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Sets the maximum payload size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the connection mode.
    #[must_use]
    pub fn mode(mut self, mode: TcpMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the connect (or accept) timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Sets the socket receive buffer size.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Sets the socket send buffer size.
    #[must_use]
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Checks that the configuration is well-formed.
    ///
    /// # Errors
    /// Returns `InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(MessengerError::invalid_argument("port must be non-zero"));
        }
        self.validate_any_port()
    }

    fn validate_any_port(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(MessengerError::invalid_argument("host must not be empty"));
        }
        if self.max_message_size == 0 {
            return Err(MessengerError::invalid_argument(
                "max_message_size must be positive",
            ));
        }
        if self.connect_timeout.is_zero()
            || self.read_timeout.is_zero()
            || self.write_timeout.is_zero()
        {
            return Err(MessengerError::invalid_argument("timeouts must be positive"));
        }
        if self.recv_buffer_size == Some(0) || self.send_buffer_size == Some(0) {
            return Err(MessengerError::invalid_argument(
                "socket buffer sizes must be positive",
            ));
        }
        Ok(())
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.tcp_nodelay)?;
        let socket = socket2::SockRef::from(stream);
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}

/// One framed TCP connection.
///
/// Receiving never waits for data that has not started to arrive: with
/// nothing buffered or readable it fails with `NoMessages`. Once part of a
/// frame is buffered, the rest is awaited for up to `read_timeout`.
pub struct TcpConnection {
    framed: Option<Framed<TcpStream, FrameCodec>>,
    peer_addr: SocketAddr,
    config: TcpConfig,
}

impl TcpConnection {
    /// Connects to `config.host:config.port`.
    ///
    /// # Errors
    /// - `InvalidArgument` if the config is malformed.
    /// - `Timeout` if the connection is not established within
    ///   `connect_timeout`.
    /// - `ConnectionFailed` if resolution or the connection fails.
    pub async fn connect(config: TcpConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = config.endpoint();
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| MessengerError::timeout("TCP connect"))?
        .map_err(|e| MessengerError::connection_failed(format!("connect to {endpoint}: {e}")))?;

        let connection = Self::from_stream(stream, config)?;
        tracing::info!("Connected to {}", connection.peer_addr);
        Ok(connection)
    }

    /// Wraps an established stream.
    ///
    /// # Errors
    /// Returns `ConnectionFailed` if the socket options cannot be applied.
    pub fn from_stream(stream: TcpStream, config: TcpConfig) -> Result<Self> {
        let peer_addr = config
            .configure(&stream)
            .and_then(|()| stream.peer_addr())
            .map_err(|e| MessengerError::connection_failed(format!("configure socket: {e}")))?;

        let codec = FrameCodec::new(config.max_message_size);
        Ok(Self {
            framed: Some(Framed::new(stream, codec)),
            peer_addr,
            config,
        })
    }

    fn framed(&mut self) -> Result<&mut Framed<TcpStream, FrameCodec>> {
        self.framed
            .as_mut()
            .ok_or_else(|| MessengerError::invalid_argument("connection is closed"))
    }

    /// Sends one message.
    ///
    /// # Errors
    /// - `MessageTooLarge` if the payload exceeds `max_message_size`. Nothing
    ///   is written.
    /// - `Timeout` if the frame is not written within `write_timeout`. The
    ///   connection stays open: unsent bytes stay buffered and go out ahead of
    ///   the next message, so the stream never carries a torn frame.
    /// - `SendFailed` if the socket fails.
    /// - `InvalidArgument` if the connection is closed.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let max = self.config.max_message_size;
        if message.payload().len() > max {
            return Err(MessengerError::message_too_large(message.payload().len(), max));
        }

        let write_timeout = self.config.write_timeout;
        let framed = self.framed()?;
        // A frame is either wholly in the write buffer or not at all; a
        // timed-out flush resumes on the next send.
        match tokio::time::timeout(write_timeout, framed.send(message)).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    "Sent {} bytes on topic {:?}",
                    message.payload().len(),
                    message.topic()
                );
                Ok(())
            }
            Ok(Err(e)) => Err(send_error(e)),
            Err(_) => Err(MessengerError::timeout("TCP send")),
        }
    }

    /// Receives one message if one is available.
    ///
    /// # Errors
    /// - `NoMessages` if no data has arrived.
    /// - `Timeout` if a partial frame is not completed within `read_timeout`.
    ///   The partial bytes stay buffered.
    /// - `ReceiveFailed` if the peer closed the connection or the socket
    ///   failed. The connection is closed.
    /// - `MessageTooLarge` or `InvalidArgument` for an unframeable frame. The
    ///   connection is closed.
    pub async fn receive(&mut self) -> Result<Message> {
        let read_timeout = self.config.read_timeout;
        let framed = self.framed()?;

        let polled = poll_fn(|cx| Poll::Ready(framed.poll_next_unpin(cx))).await;
        let next = match polled {
            Poll::Ready(next) => next,
            Poll::Pending if framed.read_buffer().is_empty() => {
                return Err(MessengerError::NoMessages);
            }
            Poll::Pending => tokio::time::timeout(read_timeout, framed.next())
                .await
                .map_err(|_| MessengerError::timeout("TCP receive"))?,
        };
        self.finish_receive(next)
    }

    /// Waits up to `timeout` for one message.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing arrives in time, otherwise as
    /// [`receive`](Self::receive).
    pub async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let framed = self.framed()?;
        let next = tokio::time::timeout(timeout, framed.next())
            .await
            .map_err(|_| MessengerError::timeout("TCP receive"))?;
        self.finish_receive(next)
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

    fn finish_receive(&mut self, next: Option<Result<Message>>) -> Result<Message> {
        match next {
            Some(Ok(message)) => {
                tracing::debug!(
                    "Received {} bytes on topic {:?}",
                    message.payload().len(),
                    message.topic()
                );
                Ok(message)
            }
            Some(Err(e)) => {
                let err = receive_error(e);
                tracing::warn!("Closing connection to {}: {}", self.peer_addr, err);
                self.framed = None;
                Err(err)
            }
            None => {
                tracing::info!("Connection to {} closed by peer", self.peer_addr);
                self.framed = None;
                Err(MessengerError::receive_failed("connection closed by peer"))
            }
        }
    }

    /// Flushes pending bytes and shuts the connection down. Calling this
    /// again is a no-op.
    pub async fn close(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            return;
        };

        let closed =
            tokio::time::timeout(self.config.write_timeout, SinkExt::<&Message>::close(&mut framed))
                .await;
        match closed {
            Ok(Ok(())) => tracing::info!("Closed connection to {}", self.peer_addr),
            Ok(Err(e)) => tracing::warn!("Error closing connection to {}: {}", self.peer_addr, e),
            Err(_) => tracing::warn!("Timed out closing connection to {}", self.peer_addr),
        }
    }

    /// Returns true until the connection is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Returns the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

/// I/O failures surface as `Internal` from the codec; they are send failures here.
fn send_error(err: MessengerError) -> MessengerError {
    match err {
        MessengerError::Internal { message } => MessengerError::send_failed(message),
        MessengerError::Timeout { .. } => MessengerError::send_failed("socket would block"),
        other => other,
    }
}

fn receive_error(err: MessengerError) -> MessengerError {
    match err {
        MessengerError::Internal { message } => MessengerError::receive_failed(message),
        MessengerError::Timeout { .. } => MessengerError::receive_failed("socket would block"),
        other => other,
    }
}

/// Passive side: listens on `host:port` and accepts a peer.
pub struct TcpAcceptor {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpAcceptor {
    /// Binds to `config.host:config.port`. Port 0 picks an ephemeral port.
    ///
    /// # Errors
    /// - `InvalidArgument` if the config is malformed.
    /// - `ConnectionFailed` if binding fails.
    pub async fn bind(config: TcpConfig) -> Result<Self> {
        config.validate_any_port()?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                MessengerError::connection_failed(format!("bind {}: {e}", config.endpoint()))
            })?;
        tracing::info!("Listening on {}", config.endpoint());

        Ok(Self { listener, config })
    }

    /// Returns the local address the acceptor is bound to.
    ///
    /// # Errors
    /// Returns `Internal` if the address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one peer within `connect_timeout`.
    ///
    /// # Errors
    /// - `Timeout` if no peer connects in time.
    /// - `ConnectionFailed` if accepting fails.
    pub async fn accept(&self) -> Result<TcpConnection> {
        let (stream, addr) = tokio::time::timeout(self.config.connect_timeout, self.listener.accept())
            .await
            .map_err(|_| MessengerError::timeout("TCP accept"))?
            .map_err(|e| MessengerError::connection_failed(format!("accept: {e}")))?;

        let connection = TcpConnection::from_stream(stream, self.config.clone())?;
        tracing::info!("Accepted connection from {}", addr);
        Ok(connection)
    }
}
