//! Operations shared by every transport engine.

use crate::ipc::SharedQueue;
use crate::tcp::TcpConnection;
use std::future::Future;
use std::time::Duration;
use twinwire_core::{Message, Result};

/// A point-to-point message transport.
///
/// `receive` never waits for a message that has not started to arrive; it
/// fails with `NoMessages` instead. Use `receive_timeout` to wait.
pub trait Transport: Send {
    /// Sends one message.
    ///
    /// # Errors
    /// Returns `MessageTooLarge` before anything is written if the payload
    /// exceeds [`max_message_size`](Self::max_message_size), and a transport
    /// error otherwise.
    fn send(&mut self, message: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Receives one message if one is available.
    ///
    /// # Errors
    /// Returns `NoMessages` if nothing is available.
    fn receive(&mut self) -> impl Future<Output = Result<Message>> + Send;

    /// Waits up to `timeout` for one message.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing arrives in time.
    fn receive_timeout(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Releases the transport. Later operations fail with `InvalidArgument`.
    /// Calling this again is a no-op.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Returns true until the transport is closed.
    fn is_open(&self) -> bool;

    /// Returns the largest payload this transport accepts.
    fn max_message_size(&self) -> usize;
}

impl Transport for SharedQueue {
    async fn send(&mut self, message: &Message) -> Result<()> {
        self.try_send(message)
    }

    async fn receive(&mut self) -> Result<Message> {
        self.try_recv()
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        self.recv_timeout(timeout).await
    }

    async fn close(&mut self) {
        self.detach();
    }

    fn is_open(&self) -> bool {
        self.is_attached()
    }

    fn max_message_size(&self) -> usize {
        self.config().max_message_size
    }
}

impl Transport for TcpConnection {
    async fn send(&mut self, message: &Message) -> Result<()> {
        TcpConnection::send(self, message).await
    }

    async fn receive(&mut self) -> Result<Message> {
        TcpConnection::receive(self).await
    }

    async fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        TcpConnection::receive_timeout(self, timeout).await
    }

    async fn close(&mut self) {
        TcpConnection::close(self).await;
    }

    fn is_open(&self) -> bool {
        TcpConnection::is_open(self)
    }

    fn max_message_size(&self) -> usize {
        self.config().max_message_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::IpcConfig;
    use crate::tcp::{TcpAcceptor, TcpConfig};
    use twinwire_core::ErrorKind;

    async fn exchange<A: Transport, B: Transport>(a: &mut A, b: &mut B) {
        let message = Message::new("greeting", &b"hello"[..]).unwrap();
        a.send(&message).await.unwrap();
        let received = b.receive_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(received, message);

        let err = b.receive().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMessages);

        let oversized = Message::new("t", vec![0u8; a.max_message_size() + 1]).unwrap();
        let err = a.send(&oversized).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);

        a.close().await;
        a.close().await;
        assert!(!a.is_open());
        let err = a.send(&message).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_shared_queue_transport() {
        let dir = tempfile::tempdir().unwrap();
        let config = IpcConfig::new("transport").segment_dir(dir.path());
        let mut a = SharedQueue::open(config.clone()).unwrap();
        let mut b = SharedQueue::open(config).unwrap();
        exchange(&mut a, &mut b).await;
    }

    #[tokio::test]
    async fn test_tcp_transport() {
        let acceptor = TcpAcceptor::bind(TcpConfig::new("127.0.0.1", 0)).await.unwrap();
        let port = acceptor.local_addr().unwrap().port();
        let (accepted, connected) = tokio::join!(
            acceptor.accept(),
            TcpConnection::connect(TcpConfig::new("127.0.0.1", port))
        );
        let mut client = connected.unwrap();
        let mut server = accepted.unwrap();
        exchange(&mut client, &mut server).await;
    }
}
