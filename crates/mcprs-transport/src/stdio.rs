//! Newline-delimited stdio transport (spec.md §4.3 "stdio").
//!
//! The sender appends a single `\n` per frame; the receiver buffers bytes
//! until a newline and emits the byte run that preceded it. Empty lines are
//! dropped. Reads run on a dedicated task so `receive` never blocks the
//! caller on partial reads.

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};

type BoxedRead = std::pin::Pin<Box<dyn AsyncRead + Send + 'static>>;
type BoxedWrite = std::pin::Pin<Box<dyn AsyncWrite + Send + 'static>>;

/// stdio transport over the current process's stdin/stdout, or any pair of
/// boxed async streams (e.g. a spawned child's stdio).
#[derive(Debug)]
pub struct StdioTransport {
    writer: Arc<AsyncMutex<Option<FramedWrite<BoxedWrite, LinesCodec>>>>,
    inbound: Arc<AsyncMutex<mpsc::Receiver<Bytes>>>,
    inbound_tx: mpsc::Sender<Bytes>,
    reader_started: Arc<AsyncMutex<Option<BoxedRead>>>,
    connected: Arc<std::sync::atomic::AtomicBool>,
}

impl StdioTransport {
    /// Build a transport over the current process's stdin/stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::from_raw(Box::pin(tokio::io::stdin()), Box::pin(tokio::io::stdout()))
    }

    /// Build a transport over arbitrary async streams, e.g. a child
    /// process's stdio or an in-process pipe used in tests.
    #[must_use]
    pub fn from_raw(reader: BoxedRead, writer: BoxedWrite) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            writer: Arc::new(AsyncMutex::new(Some(FramedWrite::new(writer, LinesCodec::new())))),
            inbound: Arc::new(AsyncMutex::new(rx)),
            inbound_tx: tx,
            reader_started: Arc::new(AsyncMutex::new(Some(reader))),
            connected: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> TransportResult<()> {
        use std::sync::atomic::Ordering;
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(reader) = self.reader_started.lock().await.take() else {
            return Ok(());
        };
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let mut framed = FramedRead::new(BufReader::new(reader), LinesCodec::new());
            use futures::StreamExt;
            while let Some(line) = framed.next().await {
                match line {
                    Ok(line) => {
                        if line.is_empty() {
                            continue;
                        }
                        trace!(bytes = line.len(), "stdio: received frame");
                        if tx.send(Bytes::from(line.into_bytes())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "stdio: line decode error, closing receive stream");
                        break;
                    }
                }
            }
            debug!("stdio: reader task exiting");
        });
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        use std::sync::atomic::Ordering;
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        use futures::SinkExt;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let line = String::from_utf8_lossy(&frame).into_owned();
        writer
            .send(line)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        Ok(self.inbound.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_frame_over_a_pipe() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let client = StdioTransport::from_raw(Box::pin(client_read), Box::pin(client_write));
        let server = StdioTransport::from_raw(Box::pin(server_read), Box::pin(server_write));
        client.connect().await.unwrap();
        server.connect().await.unwrap();

        client.send(Bytes::from_static(b"{\"hello\":1}")).await.unwrap();
        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(&received[..], b"{\"hello\":1}");
    }

    #[tokio::test]
    async fn empty_lines_are_dropped() {
        let (client_io, server_io) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let client = StdioTransport::from_raw(Box::pin(client_read), Box::pin(client_write));
        let server = StdioTransport::from_raw(Box::pin(server_read), Box::pin(server_write));
        client.connect().await.unwrap();
        server.connect().await.unwrap();

        client.send(Bytes::from_static(b"")).await.unwrap();
        client.send(Bytes::from_static(b"{\"a\":1}")).await.unwrap();
        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(&received[..], b"{\"a\":1}");
    }
}
