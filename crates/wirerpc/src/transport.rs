//! # Transport Abstraction
//!
//! Moves opaque frames between two endpoints. A transport knows nothing about
//! envelopes; it only has to preserve frame boundaries.
//!
//! `send` is synchronous so that issuing a call never has to wait on the
//! network; transports with real I/O should queue. `recv` is awaited by the
//! connection pump.

use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::mpsc;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Any other I/O failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a frame-preserving, bidirectional byte channel.
///
/// Object-safe, so endpoints hold it as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queues one frame for the peer.
    fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Waits for the next frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// In-memory transport pair built on tokio channels.
///
/// Frames sent on one end arrive on the other, in order.
pub struct DuplexTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DuplexTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Self { tx: Mutex::new(Some(tx_a)), rx: tokio::sync::Mutex::new(rx_b) };
        let b = Self { tx: Mutex::new(Some(tx_b)), rx: tokio::sync::Mutex::new(rx_a) };
        (a, b)
    }

    /// Stops sending. The peer's `recv` drains what is queued, then yields
    /// `Ok(None)`.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    fn send(&self, frame: Vec<u8>) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(Error::ConnectionLost("closed locally".into()));
        };
        tx.send(frame).map_err(|_| Error::ConnectionLost("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        let (a, b) = DuplexTransport::pair();
        a.send(vec![1]).unwrap();
        a.send(vec![2, 2]).unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(vec![1]));
        assert_eq!(b.recv().await.unwrap(), Some(vec![2, 2]));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (a, b) = DuplexTransport::pair();
        a.send(vec![9]).unwrap();
        a.close();
        assert!(matches!(a.send(vec![0]), Err(Error::ConnectionLost(_))));
        assert_eq!(b.recv().await.unwrap(), Some(vec![9]));
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (a, b) = DuplexTransport::pair();
        drop(b);
        assert!(a.send(vec![1]).is_err());
        assert!(a.is_closed());
    }
}
