//! The `Client<T>` convenience wrapper (spec.md §4.4/§4.5 from the Client
//! side): owns the transport and the underlying [`Peer`], and exposes typed
//! calls over its outbound path instead of making every caller spell out
//! `peer.call::<Method>(params)`. Grounded on the connect/initialize
//! sequencing in `turbomcp-client/src/client/core.rs`'s `Client::initialize`,
//! generalized to the shared engine rather than a client-only dispatch path.

use std::sync::Arc;
use std::time::Duration;

use mcprs_engine::{HandshakeState, Peer};
use mcprs_protocol::catalog::{
    CompleteParams, CompleteResult, CompletionComplete, LogLevel, LoggingSetLevel, SetLevelParams,
};
use mcprs_protocol::{ClientCapabilities, Implementation, InitializeResult, Method, ProtocolVersion};
use mcprs_transport::Transport;
use serde_json::Value;

use crate::error::ClientError;

/// A Client-role peer: the transport it was built on, plus the engine that
/// speaks JSON-RPC over it.
pub struct Client<T: Transport + 'static> {
    pub(crate) transport: Arc<T>,
    pub(crate) peer: Arc<Peer<T>>,
    pub(crate) implementation: Implementation,
    pub(crate) capabilities: ClientCapabilities,
    pub(crate) call_timeout: Option<Duration>,
}

impl<T: Transport + 'static> Client<T> {
    /// Establishes the underlying transport. Idempotent except on
    /// transports that document otherwise (the HTTP client errors on a
    /// second call, per spec.md §8).
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.transport.connect().await.map_err(Into::into)
    }

    /// Tears down the transport and fails every outstanding outbound call
    /// with `CallError::ConnectionClosed`.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.transport.disconnect().await.map_err(Into::into)
    }

    /// Starts the background task that pulls frames off the transport and
    /// dispatches them. Must be running before `initialize` is awaited.
    pub fn spawn_receive_loop(&self) -> tokio::task::JoinHandle<()> {
        self.peer.spawn_receive_loop()
    }

    /// Runs the `initialize` handshake and immediately sends
    /// `notifications/initialized`, completing this side's view of the
    /// barrier (spec.md §4.5).
    pub async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        let result = self
            .peer
            .initialize(self.implementation.clone(), self.capabilities.clone())
            .await?;
        self.peer.send_initialized();
        Ok(result)
    }

    #[must_use]
    pub fn handshake_state(&self) -> HandshakeState {
        self.peer.handshake_state()
    }

    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.peer.negotiated_version()
    }

    /// Typed `ping()` convenience shared by both roles (spec.md §4.4).
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.peer.ping().await.map_err(Into::into)
    }

    /// `logging/setLevel`, gated on the server advertising `logging`.
    pub async fn set_log_level(&self, level: LogLevel) -> Result<(), ClientError> {
        self.call_gated::<LoggingSetLevel>(SetLevelParams { level }).await?;
        Ok(())
    }

    /// `completion/complete`, gated on the server advertising `completions`.
    pub async fn complete(&self, params: CompleteParams) -> Result<CompleteResult, ClientError> {
        self.call_gated::<CompletionComplete>(params).await
    }

    /// Fire-and-forget outbound notification.
    pub fn notify(&self, method: impl Into<String>, params: Value) {
        self.peer.notify(method, params);
    }

    /// Access to the underlying engine for calls this wrapper does not name
    /// a convenience for (e.g. a host-defined `Method`).
    #[must_use]
    pub fn peer(&self) -> &Arc<Peer<T>> {
        &self.peer
    }

    async fn call_gated<M: Method>(&self, params: M::Params) -> Result<M::Result, ClientError> {
        if self.peer.handshake_state() == HandshakeState::Uninitialized {
            return Err(ClientError::NotInitialized);
        }
        match self.call_timeout {
            Some(timeout) => self.peer.call_with_timeout::<M>(params, timeout).await.map_err(Into::into),
            None => self.peer.call::<M>(params).await.map_err(Into::into),
        }
    }
}
