//! The core transport contract (spec.md §4.2, C2).

use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;

/// A duplex, frame-preserving bytestream channel.
///
/// Frames are opaque to the transport — it never parses JSON. Implementors
/// MUST preserve message boundaries: one emitted [`Bytes`] value per
/// JSON-RPC message or batch array, exactly as the sender wrote it.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish the underlying channel. Idempotent: calling `connect` again
    /// while already connected is a no-op unless the transport documents
    /// otherwise (the HTTP client transport, for instance, errors on a
    /// second `connect` per spec.md §8's round-trip law).
    async fn connect(&self) -> TransportResult<()>;

    /// Tear down the channel. Idempotent. Terminates the receive stream and
    /// causes in-flight sends to fail with [`crate::error::TransportError::ConnectionClosed`].
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send one frame. Ordered per direction. Fails with
    /// [`crate::error::TransportError::ConnectionClosed`] after `disconnect`.
    async fn send(&self, frame: Bytes) -> TransportResult<()>;

    /// Receive the next frame, or `None` when the peer has closed the
    /// stream. Finite when the peer closes; restartable only across
    /// reconnects.
    async fn receive(&self) -> TransportResult<Option<Bytes>>;
}
