//! In-memory connected pair (spec.md §4.3 "In-memory pair").
//!
//! Two linked bounded queues; `create_connected_pair` returns `(a, b)` whose
//! `send` on one surfaces on the other's `receive`. Disconnecting either side
//! closes both streams: dropping our outbound sender makes the peer's
//! `receive` observe end-of-stream, and closing our own inbound receiver
//! makes the peer's `send` fail immediately rather than stall.

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
}

/// Create a pair of linked in-memory transports. Frames sent on `a` are
/// received by `b` and vice versa.
#[must_use]
pub fn create_connected_pair() -> (MemoryTransport, MemoryTransport) {
    let (tx_ab, rx_ab) = mpsc::channel(CHANNEL_CAPACITY);
    let (tx_ba, rx_ba) = mpsc::channel(CHANNEL_CAPACITY);
    (
        MemoryTransport {
            tx: Mutex::new(Some(tx_ab)),
            rx: Mutex::new(rx_ba),
        },
        MemoryTransport {
            tx: Mutex::new(Some(tx_ba)),
            rx: Mutex::new(rx_ab),
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.tx.lock().await.take();
        self.rx.lock().await.close();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        Ok(self.rx.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_flow_both_directions() {
        let (a, b) = create_connected_pair();
        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.receive().await.unwrap().unwrap(), Bytes::from_static(b"ping"));

        b.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a.receive().await.unwrap().unwrap(), Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn disconnect_closes_both_sides() {
        let (a, b) = create_connected_pair();
        a.disconnect().await.unwrap();
        assert!(a.send(Bytes::from_static(b"x")).await.is_err());
        assert!(b.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (a, _b) = create_connected_pair();
        a.disconnect().await.unwrap();
        a.disconnect().await.unwrap();
    }
}
