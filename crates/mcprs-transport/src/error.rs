//! Transport-level errors (spec.md §4.2, §4.3).

use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("socket path too long: {path} ({len} bytes, max {max})")]
    PathTooLong { path: String, len: usize, max: usize },
    #[error("socket path already exists: {0}")]
    SocketExists(String),
    #[error("session expired")]
    SessionExpired,
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
}
