//! Unix-domain-socket transport, server and client modes (spec.md §4.3
//! "Unix-domain socket").

use crate::error::{TransportError, TransportResult};
use crate::traits::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

/// Sentinel frame emitted into the receive stream whenever the server
/// accepts a new connection, so the engine can reset per-connection state.
/// Never a valid JSON-RPC frame (it isn't valid JSON at all), so the engine
/// filters it out by exact match before attempting to decode anything.
pub const NEW_CONNECTION_SENTINEL: &[u8] = b"\0mcprs:new-connection\0";

/// Platform maximum for `sockaddr_un.sun_path`, including the NUL
/// terminator the OS appends. Linux allows 107 usable bytes; the historical
/// BSD/Darwin limit is 103.
#[cfg(target_os = "linux")]
pub const MAX_SOCKET_PATH_LEN: usize = 107;
#[cfg(not(target_os = "linux"))]
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// What to do when the server's socket path already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Unlink the existing path before binding.
    RemoveExisting,
    /// Fail immediately if the path exists.
    FailIfExists,
    /// Try connecting to the existing path first; if nothing answers,
    /// unlink the stale socket and bind fresh.
    ReuseIfPossible,
}

fn validate_path_length(path: &Path) -> TransportResult<()> {
    let as_str = path.to_string_lossy();
    let len = as_str.as_bytes().len();
    // `MAX_SOCKET_PATH_LEN` is the platform's `sizeof(sun_path) - 1`, i.e.
    // the longest path that still leaves room for the NUL terminator — a
    // path of exactly that length is valid, so only a longer one overflows.
    if len > MAX_SOCKET_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: as_str.into_owned(),
            len,
            max: MAX_SOCKET_PATH_LEN,
        });
    }
    Ok(())
}

type Writer = FramedWrite<tokio::net::unix::OwnedWriteHalf, LinesCodec>;

enum Mode {
    Server { path: PathBuf, cleanup: CleanupPolicy },
    Client { path: PathBuf },
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Server { path, cleanup } => {
                write!(f, "Server {{ path: {path:?}, cleanup: {cleanup:?} }}")
            }
            Mode::Client { path } => write!(f, "Client {{ path: {path:?} }}"),
        }
    }
}

/// Unix-domain-socket transport. In server mode it runs an accept loop and
/// emits [`NEW_CONNECTION_SENTINEL`] on every new connection; writes go to
/// the most recently accepted connection.
#[derive(Debug)]
pub struct UnixTransport {
    mode: Mode,
    writer: Arc<Mutex<Option<Writer>>>,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl UnixTransport {
    #[must_use]
    pub fn new_server(path: impl Into<PathBuf>, cleanup: CleanupPolicy) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            mode: Mode::Server {
                path: path.into(),
                cleanup,
            },
            writer: Arc::new(Mutex::new(None)),
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
        }
    }

    #[must_use]
    pub fn new_client(path: impl Into<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self {
            mode: Mode::Client { path: path.into() },
            writer: Arc::new(Mutex::new(None)),
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
        }
    }

    async fn prepare_server_path(path: &Path, cleanup: CleanupPolicy) -> TransportResult<()> {
        match cleanup {
            CleanupPolicy::RemoveExisting => {
                if path.exists() {
                    tokio::fs::remove_file(path)
                        .await
                        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                }
            }
            CleanupPolicy::FailIfExists => {
                if path.exists() {
                    return Err(TransportError::SocketExists(path.display().to_string()));
                }
            }
            CleanupPolicy::ReuseIfPossible => {
                if path.exists() {
                    match UnixStream::connect(path).await {
                        Ok(_) => return Err(TransportError::SocketExists(path.display().to_string())),
                        Err(_) => {
                            tokio::fs::remove_file(path)
                                .await
                                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one accepted (server) or dialed (client) connection: publish
    /// the write half into the shared `writer` slot, emit the new-connection
    /// sentinel (server side only), then forward lines until the peer closes.
    async fn pump_connection(
        stream: UnixStream,
        inbound_tx: mpsc::Sender<Bytes>,
        writer_slot: Arc<Mutex<Option<Writer>>>,
        emit_sentinel: bool,
    ) {
        let (read_half, write_half) = stream.into_split();
        *writer_slot.lock().await = Some(FramedWrite::new(write_half, LinesCodec::new()));

        if emit_sentinel
            && inbound_tx
                .send(Bytes::from_static(NEW_CONNECTION_SENTINEL))
                .await
                .is_err()
        {
            return;
        }

        let mut framed = FramedRead::new(BufReader::new(read_half), LinesCodec::new());
        while let Some(line) = framed.next().await {
            match line {
                Ok(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    if inbound_tx.send(Bytes::from(line.into_bytes())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "unix: line decode error, closing connection");
                    break;
                }
            }
        }
        debug!("unix: connection handler exiting");
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self) -> TransportResult<()> {
        match &self.mode {
            Mode::Server { path, cleanup } => {
                validate_path_length(path)?;
                Self::prepare_server_path(path, *cleanup).await?;
                let listener =
                    UnixListener::bind(path).map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                info!(?path, "unix: server listening");

                let inbound_tx = self.inbound_tx.clone();
                let writer_slot = Arc::clone(&self.writer);
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, _addr)) => {
                                info!("unix: accepted connection");
                                tokio::spawn(Self::pump_connection(
                                    stream,
                                    inbound_tx.clone(),
                                    Arc::clone(&writer_slot),
                                    true,
                                ));
                            }
                            Err(err) => {
                                warn!(%err, "unix: accept failed, stopping accept loop");
                                break;
                            }
                        }
                    }
                });
                Ok(())
            }
            Mode::Client { path } => {
                validate_path_length(path)?;
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
                let inbound_tx = self.inbound_tx.clone();
                let writer_slot = Arc::clone(&self.writer);
                tokio::spawn(Self::pump_connection(stream, inbound_tx, writer_slot, false));
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.writer.lock().await = None;
        self.inbound_rx.lock().await.close();
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
        Ok(self.inbound_rx.lock().await.recv().await)
    }
}
