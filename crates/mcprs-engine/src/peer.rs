//! The shared symmetric Client/Server engine (spec.md §4.4 C4, §4.5 C5).
//!
//! New composition: no single teacher file implements a transport-agnostic
//! symmetric peer (the teacher keeps client and server as separate crates,
//! each owning its own dispatch path). Written in the teacher's idiom —
//! `Arc<dyn Fn(...) -> BoxFuture<...> + Send + Sync>` handler registration
//! (`turbomcp-server/src/handlers.rs`), `DashMap` correlation/inflight
//! tables, `tracing` spans per request (`context/request.rs`) — generalized
//! to the engine spec.md §4.4 describes.

use crate::context::{OutboundCall, PeerUpcalls, RequestContext};
use crate::correlation::{CallError, CorrelationTable};
use crate::notify::{NotificationBus, ProgressEvent, ProgressToken};
use dashmap::DashMap;
use futures::future::BoxFuture;
use mcprs_core::{
    EnvelopeFields, Frame, GeneralFields, McpError, Notification, Request, RequestId, Response,
    SingleFrame,
};
use mcprs_protocol::{
    check_gate, negotiate_version_or_fail, ClientCapabilities, GatingMode, HandshakeState,
    Implementation, InitializeRequest, InitializeResult, ProtocolVersion, ServerCapabilities,
};
use mcprs_transport::Transport;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

const NOTIF_CANCELLED: &str = "notifications/cancelled";
const NOTIF_INITIALIZED: &str = "notifications/initialized";
const NOTIF_PROGRESS: &str = "notifications/progress";
const METHOD_INITIALIZE: &str = "initialize";
const METHOD_PING: &str = "ping";

/// Which side of the handshake this peer plays; determines the dispatch
/// direction and which capability set gates outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Client,
    Server,
}

type HandlerFn = Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>;
type InitHook = Arc<dyn Fn(Implementation, ClientCapabilities) -> BoxFuture<'static, Result<(), McpError>> + Send + Sync>;

/// Static configuration supplied at construction time: identity,
/// capabilities, supported protocol versions, and gating mode.
pub struct PeerConfig {
    pub role: PeerRole,
    pub implementation: Implementation,
    pub client_capabilities: ClientCapabilities,
    pub server_capabilities: ServerCapabilities,
    pub supported_versions: Vec<ProtocolVersion>,
    pub gating: GatingMode,
}

struct HandshakeSlot {
    state: parking_lot::Mutex<HandshakeState>,
    negotiated_version: parking_lot::Mutex<Option<ProtocolVersion>>,
    remote_client_caps: parking_lot::Mutex<Option<ClientCapabilities>>,
    remote_server_caps: parking_lot::Mutex<Option<ServerCapabilities>>,
    init_hook: parking_lot::Mutex<Option<InitHook>>,
}

/// The engine: owns the correlation table, inbound handler registry,
/// in-flight cancellation tokens, and the serialized outbound write path.
/// Generic over the transport so stdio/memory/unix/http all share one
/// implementation (spec.md §4.4: "Single engine shared between Client and
/// Server roles").
pub struct Peer<T: Transport + 'static> {
    transport: Arc<T>,
    config: PeerConfig,
    correlation: CorrelationTable,
    notifications: NotificationBus,
    handlers: DashMap<String, HandlerFn>,
    inflight: DashMap<RequestId, CancellationToken>,
    outbound_tx: mpsc::UnboundedSender<Value>,
    handshake: HandshakeSlot,
    disconnected: AtomicBool,
    /// Opaque auth context surfaced to every inbound `RequestContext` on this
    /// connection (spec.md §4.6 `authInfo`). Populated once by HTTP hosts
    /// from their validation pipeline; `None` on every other transport.
    auth_info: parking_lot::Mutex<Option<Value>>,
    /// SSE-close hooks (spec.md §4.6 `closeSSEStream`/`closeStandaloneSSEStream`);
    /// set once by the HTTP session layer, `None` everywhere else.
    sse_hooks: parking_lot::Mutex<Option<(crate::context::CloseStreamHook, crate::context::CloseStreamHook)>>,
}

impl<T: Transport + 'static> Peer<T> {
    /// Builds the engine and spawns its writer task. Call
    /// [`Peer::spawn_receive_loop`] once handlers are registered to start
    /// pulling frames off the transport.
    #[must_use]
    pub fn new(transport: Arc<T>, config: PeerConfig) -> Arc<Self> {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
        let peer = Arc::new(Self {
            transport: Arc::clone(&transport),
            config,
            correlation: CorrelationTable::new(),
            notifications: NotificationBus::new(),
            handlers: DashMap::new(),
            inflight: DashMap::new(),
            outbound_tx,
            handshake: HandshakeSlot {
                state: parking_lot::Mutex::new(HandshakeState::Uninitialized),
                negotiated_version: parking_lot::Mutex::new(None),
                remote_client_caps: parking_lot::Mutex::new(None),
                remote_server_caps: parking_lot::Mutex::new(None),
                init_hook: parking_lot::Mutex::new(None),
            },
            disconnected: AtomicBool::new(false),
            auth_info: parking_lot::Mutex::new(None),
            sse_hooks: parking_lot::Mutex::new(None),
        });
        peer.register_ping_default();

        tokio::spawn(async move {
            while let Some(value) = outbound_rx.recv().await {
                let bytes = match serde_json::to_vec(&value) {
                    Ok(b) => b,
                    Err(err) => {
                        error!(%err, "peer: failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(err) = transport.send(bytes.into()).await {
                    warn!(%err, "peer: send failed, frame dropped");
                }
            }
            debug!("peer: writer task exiting, outbound channel closed");
        });

        peer
    }

    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.config.role
    }

    /// Set the opaque `authInfo` every subsequent inbound `RequestContext`
    /// on this connection will carry. HTTP hosts call this once per session
    /// from their validation pipeline; unused elsewhere.
    pub fn set_auth_info(&self, info: Option<Value>) {
        *self.auth_info.lock() = info;
    }

    /// Set the idempotent close hooks every subsequent inbound
    /// `RequestContext` on this connection will carry.
    pub fn set_sse_hooks(&self, close: crate::context::CloseStreamHook, close_standalone: crate::context::CloseStreamHook) {
        *self.sse_hooks.lock() = Some((close, close_standalone));
    }

    /// Register the hook run synchronously against an inbound `initialize`
    /// before the response is built (spec.md §4.5 "Initialize hook").
    pub fn on_initialize(&self, hook: InitHook) {
        *self.handshake.init_hook.lock() = Some(hook);
    }

    /// Register a typed handler for `M::NAME`. Decodes params into
    /// `M::Params` (→ `invalidParams` on failure) and encodes `M::Result`
    /// back to JSON, matching spec.md §4.4 inbound-dispatch steps a/b.
    pub fn register<M, F, Fut>(&self, handler: F)
    where
        M: mcprs_protocol::Method,
        F: Fn(RequestContext, M::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<M::Result, McpError>> + Send + 'static,
    {
        let boxed: HandlerFn = Arc::new(move |ctx, raw_params| {
            let params: Result<M::Params, _> = serde_json::from_value(raw_params);
            match params {
                Ok(params) => {
                    let fut = handler(ctx, params);
                    Box::pin(async move {
                        let result = fut.await?;
                        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
                    })
                }
                Err(err) => Box::pin(async move { Err(McpError::invalid_params(err.to_string())) }),
            }
        });
        self.handlers.insert(M::NAME.to_string(), boxed);
    }

    /// Register (or replace) the handler for a raw method name, bypassing
    /// the typed `Method` wrapper. Used for the default `ping` handler and
    /// by hosts that want untyped access.
    pub fn register_raw(&self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.notifications.on(method, handler);
    }

    pub fn on_progress<F>(&self, token: ProgressToken, handler: F)
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.notifications.on_progress(token, handler);
    }

    fn register_ping_default(self: &Arc<Self>) {
        let handler: HandlerFn = Arc::new(|_ctx, _params| Box::pin(async { Ok(serde_json::json!({})) }));
        self.handlers.insert(METHOD_PING.to_string(), handler);
    }

    /// Typed client `ping()` convenience (spec.md §4.4 "Ping").
    pub async fn ping(self: &Arc<Self>) -> Result<(), CallError> {
        self.send_request_typed(METHOD_PING, serde_json::json!({})).await?;
        Ok(())
    }

    /// Send a typed outbound request and await its result.
    pub async fn call<M: mcprs_protocol::Method>(self: &Arc<Self>, params: M::Params) -> Result<M::Result, CallError> {
        let payload = serde_json::to_value(params).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))?;
        let result = self.send_request_typed(M::NAME, payload).await?;
        serde_json::from_value(result).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))
    }

    async fn send_request_typed(self: &Arc<Self>, method: &str, params: Value) -> Result<Value, CallError> {
        self.send_raw(method, params).await
    }

    /// Allocate an id, register the pending entry, and write the request,
    /// returning the awaiter (spec.md §4.4 step 2-3). Dropping or cancelling
    /// the returned [`OutboundCall`] sends `notifications/cancelled` and
    /// reclaims the pending entry without waiting for a response.
    fn send_raw(self: &Arc<Self>, method: &str, params: Value) -> OutboundCall {
        let id = self.correlation.next_id();
        let rx = self.correlation.insert(id.clone());
        let request = Request::new(id.clone(), method.to_string(), Some(params));
        self.enqueue_frame(Frame::Request(Box::new(request)));
        let peer = Arc::clone(self);
        let on_drop: Arc<dyn Fn(RequestId, Option<String>) + Send + Sync> =
            Arc::new(move |id, reason| peer.cancel_request(id, reason));
        OutboundCall::new(id, rx, on_drop)
    }

    /// The public, cancellable form of an outbound call (spec.md §4.4 step
    /// 1-3): `send::<M>(params)` returns the awaiter itself rather than
    /// immediately awaiting it, so a caller can hold onto `request_id` and
    /// drop/cancel it before the response arrives.
    pub fn send<M: mcprs_protocol::Method>(self: &Arc<Self>, params: M::Params) -> Result<OutboundCall, CallError> {
        let payload = serde_json::to_value(params).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))?;
        Ok(self.send_raw(M::NAME, payload))
    }

    /// Like [`Peer::call`], but cancels the outbound request (sending
    /// `notifications/cancelled` with reason `"timeout"`) if no response
    /// arrives within `timeout`, per spec.md §5 "Deadlines on outbound
    /// requests behave as cancellations with a `timeout` reason."
    pub async fn call_with_timeout<M: mcprs_protocol::Method>(
        self: &Arc<Self>,
        params: M::Params,
        timeout: std::time::Duration,
    ) -> Result<M::Result, CallError> {
        let payload = serde_json::to_value(params).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))?;
        let call = self.send_raw(M::NAME, payload);
        let id = call.request_id.clone();
        let raw = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                self.cancel_request(id, Some("timeout".to_string()));
                return Err(CallError::Timeout);
            }
        };
        serde_json::from_value(raw).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))
    }

    /// Fire-and-forget outbound notification.
    pub fn notify(&self, method: impl Into<String>, params: Value) {
        let notification = Notification::new(method.into(), Some(params));
        self.enqueue_frame(Frame::Notification(Box::new(notification)));
    }

    /// Explicit cancellation of an outbound request the caller no longer
    /// wants: sends `notifications/cancelled` and reclaims the pending
    /// entry without waiting for a response (spec.md §4.4 step 4).
    pub fn cancel_request(&self, id: RequestId, reason: Option<String>) {
        self.correlation.remove(&id, reason.clone());
        let mut params = serde_json::json!({ "requestId": id });
        if let Some(reason) = reason {
            params["reason"] = serde_json::json!(reason);
        }
        self.notify(NOTIF_CANCELLED, params);
    }

    /// Run `initialize` as the Client: send the request, store the
    /// negotiated version and server capabilities. `initialize` is
    /// uncancellable (spec.md §4.5), so it bypasses the inflight table.
    pub async fn initialize(
        self: &Arc<Self>,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, CallError> {
        let request = InitializeRequest {
            protocol_version: self
                .config
                .supported_versions
                .first()
                .cloned()
                .unwrap_or_default(),
            capabilities: capabilities.clone(),
            client_info,
        };
        let payload = serde_json::to_value(&request).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))?;
        let raw = self.send_request_typed(METHOD_INITIALIZE, payload).await?;
        let result: InitializeResult =
            serde_json::from_value(raw).map_err(|e| CallError::Remote(McpError::internal_error(e.to_string())))?;
        *self.handshake.negotiated_version.lock() = Some(result.protocol_version.clone());
        *self.handshake.remote_server_caps.lock() = Some(result.capabilities.clone());
        *self.handshake.state.lock() = HandshakeState::Initializing;
        Ok(result)
    }

    /// Send `notifications/initialized`, completing the Client's view of
    /// the handshake.
    pub fn send_initialized(&self) {
        self.notify(mcprs_protocol::catalog::notifications::INITIALIZED, serde_json::json!({}));
        *self.handshake.state.lock() = HandshakeState::Initialized;
    }

    fn enqueue_frame(&self, frame: Frame) {
        match frame.encode() {
            Ok(value) => {
                if self.outbound_tx.send(value).is_err() {
                    warn!("peer: outbound channel closed, frame dropped");
                }
            }
            Err(err) => error!(%err, "peer: failed to encode outbound frame"),
        }
    }

    fn enqueue_value(&self, value: Value) {
        if self.outbound_tx.send(value).is_err() {
            warn!("peer: outbound channel closed, frame dropped");
        }
    }

    /// Start the receive loop as a background task. The returned handle's
    /// completion signals the transport closed.
    pub fn spawn_receive_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let peer = Arc::clone(self);
        tokio::spawn(async move { peer.receive_loop().await })
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.transport.receive().await {
                Ok(Some(bytes)) => {
                    #[cfg(feature = "unix")]
                    if bytes.as_ref() == mcprs_transport::NEW_CONNECTION_SENTINEL {
                        debug!("peer: new connection, resetting per-connection state");
                        self.inflight.clear();
                        continue;
                    }
                    self.handle_inbound_bytes(&bytes).await;
                }
                Ok(None) => {
                    debug!("peer: receive stream ended, failing pending requests");
                    self.disconnected.store(true, Ordering::SeqCst);
                    self.correlation.fail_all(|| CallError::ConnectionClosed);
                    break;
                }
                Err(err) => {
                    warn!(%err, "peer: transport receive error, stopping receive loop");
                    break;
                }
            }
        }
    }

    async fn handle_inbound_bytes(self: &Arc<Self>, bytes: &[u8]) {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "peer: malformed JSON on the wire");
                self.enqueue_frame(Frame::Response(Box::new(Response::error(
                    None,
                    &McpError::parse_error(err.to_string()),
                ))));
                return;
            }
        };
        let frame = match Frame::decode(value) {
            Ok(f) => f,
            Err(err) => {
                self.enqueue_frame(Frame::Response(Box::new(Response::error(None, &err))));
                return;
            }
        };
        match frame {
            Frame::Response(resp) => self.handle_response(*resp),
            Frame::Notification(n) => self.handle_notification(*n).await,
            Frame::Request(req) => self.spawn_single_request(*req),
            Frame::Batch(batch) => self.handle_batch(batch).await,
        }
    }

    fn handle_response(&self, resp: Response) {
        let Some(id) = resp.id.clone() else {
            warn!("peer: response with no id, dropping");
            return;
        };
        let result = resp.into_result().map_err(CallError::Remote);
        if self.correlation.resolve(&id, result).is_err() {
            debug!(%id, "peer: response for unknown or already-settled request");
        }
    }

    async fn handle_notification(self: &Arc<Self>, n: Notification) {
        trace!(method = %n.method, "peer: inbound notification");
        match n.method.as_str() {
            NOTIF_CANCELLED => self.handle_cancelled(n.params.unwrap_or(Value::Null)),
            NOTIF_INITIALIZED => {
                *self.handshake.state.lock() = HandshakeState::Initialized;
            }
            NOTIF_PROGRESS => self.handle_progress(n.params.unwrap_or(Value::Null)),
            other => self.notifications.dispatch(other, n.params.unwrap_or(Value::Null)),
        }
    }

    fn handle_cancelled(&self, params: Value) {
        let Some(id) = params.get("requestId").cloned().and_then(|v| serde_json::from_value::<RequestId>(v).ok())
        else {
            warn!("peer: malformed notifications/cancelled, dropping");
            return;
        };
        match self.inflight.get(&id) {
            Some(token) => {
                token.cancel();
                debug!(%id, "peer: cancelled inbound request");
            }
            None => debug!(%id, "peer: cancellation for unknown or already-finished request"),
        }
    }

    fn handle_progress(&self, params: Value) {
        let Some(token_value) = params.get("progressToken") else {
            warn!("peer: notifications/progress missing progressToken, dropping");
            return;
        };
        let Some(token) = ProgressToken::from_value(token_value) else {
            warn!("peer: notifications/progress has non-scalar progressToken, dropping");
            return;
        };
        let event = ProgressEvent {
            progress: params.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
            total: params.get("total").and_then(Value::as_f64),
            message: params.get("message").and_then(Value::as_str).map(str::to_string),
        };
        self.notifications.dispatch_progress(&token, event);
    }

    fn spawn_single_request(self: &Arc<Self>, req: Request) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(resp) = peer.clone().execute_request(req).await {
                peer.enqueue_frame(Frame::Response(Box::new(resp)));
            }
        });
    }

    async fn handle_batch(self: &Arc<Self>, batch: mcprs_core::Batch) {
        let mut pending_requests = Vec::new();
        for frame in batch.0 {
            match frame {
                SingleFrame::Response(resp) => self.handle_response(resp),
                SingleFrame::Notification(n) => self.handle_notification(n).await,
                SingleFrame::Request(req) => pending_requests.push(req),
            }
        }
        if pending_requests.is_empty() {
            return;
        }
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let responses = futures::future::join_all(
                pending_requests.into_iter().map(|req| peer.clone().execute_request(req)),
            )
            .await;
            let frames: Vec<SingleFrame> = responses.into_iter().flatten().map(SingleFrame::Response).collect();
            if !frames.is_empty() {
                peer.enqueue_frame(Frame::Batch(mcprs_core::Batch(frames)));
            }
        });
    }

    /// Runs one inbound request to completion and returns its response,
    /// unless the request was cancelled before the handler finished (in
    /// which case `None`, per spec.md §4.4's post-cancel silence rule).
    async fn execute_request(self: Arc<Self>, req: Request) -> Option<Response> {
        let id = req.id.clone();
        let method = req.method.clone();

        if method == METHOD_INITIALIZE {
            return Some(self.execute_initialize(req).await);
        }

        // Initialized barrier (spec.md §4.5, testable property #7): any
        // non-initialize request arriving before this side has ever sent or
        // received an `initialize` is refused. Once the initialize response
        // has gone out the state moves to `Initializing`, so this only ever
        // blocks requests that truly jump the gun.
        if *self.handshake.state.lock() == HandshakeState::Uninitialized {
            return Some(Response::error(
                Some(id),
                &McpError::invalid_request(format!("{method}: received before initialize")),
            ));
        }

        let Some(handler) = self.handlers.get(&method).map(|h| Arc::clone(&h)) else {
            return Some(Response::error(Some(id), &McpError::method_not_found(&method)));
        };

        let token = CancellationToken::new();
        self.inflight.insert(id.clone(), token.clone());

        let fields = req.fields.to_general_fields();
        let mut ctx = RequestContext::new(
            id.clone(),
            Some(fields),
            self.auth_info.lock().clone(),
            token.clone(),
            self.clone() as Arc<dyn PeerUpcalls>,
        );
        if let Some((close, close_standalone)) = self.sse_hooks.lock().clone() {
            ctx = ctx.with_sse_hooks(close, close_standalone);
        }

        let result = handler(ctx, req.params.unwrap_or(Value::Null)).await;
        let was_cancelled = token.is_cancelled();
        self.inflight.remove(&id);

        if was_cancelled {
            debug!(%id, "peer: response suppressed, request was cancelled");
            return None;
        }

        Some(match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::error(Some(id), &err),
        })
    }

    async fn execute_initialize(self: &Arc<Self>, req: Request) -> Response {
        let id = req.id.clone();
        let parsed: Result<InitializeRequest, _> = serde_json::from_value(req.params.unwrap_or(Value::Null));
        let parsed = match parsed {
            Ok(p) => p,
            Err(err) => return Response::error(Some(id), &McpError::invalid_params(err.to_string())),
        };

        let negotiated = match negotiate_version_or_fail(&self.config.supported_versions, std::slice::from_ref(&parsed.protocol_version)) {
            Ok(v) => v,
            Err(err) => return Response::error(Some(id), &err),
        };

        if let Some(hook) = self.handshake.init_hook.lock().clone() {
            if let Err(err) = hook(parsed.client_info.clone(), parsed.capabilities.clone()).await {
                return Response::error(Some(id), &err);
            }
        }

        *self.handshake.remote_client_caps.lock() = Some(parsed.capabilities);
        *self.handshake.negotiated_version.lock() = Some(negotiated.clone());
        *self.handshake.state.lock() = HandshakeState::Initializing;

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: self.config.server_capabilities.clone(),
            server_info: self.config.implementation.clone(),
            instructions: None,
        };
        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::error(Some(id), &McpError::internal_error(err.to_string())),
        }
    }

    /// Satisfy the initialized barrier (spec.md §4.5) without running the
    /// `initialize` exchange. Only the stateless HTTP variant calls this:
    /// spec.md §4.7 gives it no session/handshake concept at all, so its one
    /// shared peer has no `initialize` request to receive in the first
    /// place — without this, every domain POST would be permanently
    /// rejected with "received before initialize".
    pub fn mark_initialized(&self) {
        *self.handshake.state.lock() = HandshakeState::Initialized;
    }

    #[must_use]
    pub fn handshake_state(&self) -> HandshakeState {
        *self.handshake.state.lock()
    }

    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.handshake.negotiated_version.lock().clone()
    }
}

impl<T: Transport + 'static> PeerUpcalls for Peer<T> {
    fn send_notification(&self, method: &'static str, params: Value) {
        self.notify(method, params);
    }

    fn send_request(&self, method: &'static str, params: Value) -> BoxFuture<'static, Result<Value, CallError>> {
        let id = self.correlation.next_id();
        let rx = self.correlation.insert(id.clone());
        let request = Request::new(id, method.to_string(), Some(params));
        self.enqueue_frame(Frame::Request(Box::new(request)));
        // `PeerUpcalls` is called through a `&self` trait object (handlers
        // only hold a shared reference, never the owning `Arc<Peer<T>>`), so
        // this can't go through `send_raw`'s `Arc::clone(self)` cancel hook;
        // a handler-originated request (elicit/sample) is awaited to
        // completion rather than dropped mid-flight.
        Box::pin(async move { rx.await.unwrap_or(Err(CallError::ConnectionClosed)) })
    }

    fn check_gate(&self, method: &str) -> Result<(), McpError> {
        let remote_client = self.handshake.remote_client_caps.lock().clone();
        let remote_server = self.handshake.remote_server_caps.lock().clone();
        check_gate(self.config.gating, method, remote_client.as_ref(), remote_server.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcprs_protocol::catalog::{Ping, PingParams, PingResult};
    use mcprs_transport::create_connected_pair;

    fn test_config(role: PeerRole) -> PeerConfig {
        PeerConfig {
            role,
            implementation: Implementation::new("mcprs-test", "0.1.0"),
            client_capabilities: ClientCapabilities::default(),
            server_capabilities: ServerCapabilities::default(),
            supported_versions: vec!["2025-06-18".to_string()],
            gating: GatingMode::Lenient,
        }
    }

    #[tokio::test]
    async fn ping_round_trips_over_an_in_memory_pair() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();
        let result: PingResult = client.call::<Ping>(PingParams::default()).await.unwrap();
        assert_eq!(result, PingResult::default());
    }

    #[tokio::test]
    async fn method_not_found_for_unregistered_method() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();
        let err = client
            .send_request_typed("nonexistent/method", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            CallError::Remote(McpError::MethodNotFound { .. }) => {}
            other => panic!("expected MethodNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_request_suppresses_its_response() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        server.register_raw(
            "slow/op",
            Arc::new(move |ctx: RequestContext, _params| {
                let release_rx = Arc::clone(&release_rx);
                Box::pin(async move {
                    let rx = release_rx.lock().await.take().unwrap();
                    tokio::select! {
                        _ = rx => {}
                        _ = ctx.cancelled() => {}
                    }
                    Ok(serde_json::json!({}))
                })
            }),
        );
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();

        let call_client = Arc::clone(&client);
        let call_handle = tokio::spawn(async move {
            call_client.send_request_typed("slow/op", serde_json::json!({})).await
        });
        // give the server time to register the inflight entry
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // `initialize` claimed id 1, so the client's next allocation (this
        // `slow/op` call) is always id 2.
        let id = RequestId::Number(2);
        client.cancel_request(id, Some("no longer needed".into()));
        let _ = release_tx.send(());

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), call_handle).await;
        match result {
            Ok(Ok(Err(err))) => {
                assert!(matches!(err, CallError::Cancelled { .. }), "expected Cancelled, got {err:?}");
            }
            Ok(Ok(Ok(value))) => panic!("cancelled call must not receive a late response, got {value:?}"),
            Ok(Err(join_err)) => panic!("call task panicked: {join_err}"),
            Err(_) => panic!("call future never resolved after cancellation"),
        }
    }

    #[tokio::test]
    async fn non_initialize_request_before_initialize_is_rejected() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        let err = client.send_request_typed("ping", serde_json::json!({})).await.unwrap_err();
        match err {
            CallError::Remote(McpError::InvalidRequest { .. }) => {}
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_initialize_request_accepted_right_after_initialize_response() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();
        // Deliberately do not send `notifications/initialized` — the
        // barrier only requires the initialize response to have gone out.
        let result: PingResult = client.call::<Ping>(PingParams::default()).await.unwrap();
        assert_eq!(result, PingResult::default());
    }

    #[tokio::test]
    async fn call_with_timeout_cancels_and_returns_timeout_error() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));
        server.register_raw(
            "slow/op",
            Arc::new(|_ctx, _params| Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(serde_json::json!({}))
            })),
        );
        client.spawn_receive_loop();
        server.spawn_receive_loop();

        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();

        struct Slow;
        impl mcprs_protocol::Method for Slow {
            const NAME: &'static str = "slow/op";
            type Params = serde_json::Value;
            type Result = serde_json::Value;
        }

        let err = client
            .call_with_timeout::<Slow>(serde_json::json!({}), std::time::Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout));
    }

    /// spec.md §8 scenario 2: a `sleep` handler waits on an event that a
    /// concurrently-running `trigger` handler signals. Both run on
    /// independent tasks (spec.md §4.4 "Concurrency"), so `sleep` does not
    /// block `trigger` from starting or completing first.
    #[tokio::test]
    async fn concurrent_handlers_interleave_and_both_succeed() {
        let (client_io, server_io) = create_connected_pair();
        let client = Peer::new(Arc::new(client_io), test_config(PeerRole::Client));
        let server = Peer::new(Arc::new(server_io), test_config(PeerRole::Server));

        let events = Arc::new(tokio::sync::Mutex::new(Vec::<&'static str>::new()));
        let notify = Arc::new(tokio::sync::Notify::new());

        let sleep_events = Arc::clone(&events);
        let sleep_notify = Arc::clone(&notify);
        server.register_raw(
            "sleep",
            Arc::new(move |_ctx, _params| {
                let events = Arc::clone(&sleep_events);
                let notify = Arc::clone(&sleep_notify);
                Box::pin(async move {
                    events.lock().await.push("sleep:waiting_for_event");
                    notify.notified().await;
                    events.lock().await.push("sleep:tool_end");
                    Ok(serde_json::json!({}))
                })
            }),
        );

        let trigger_events = Arc::clone(&events);
        let trigger_notify = Arc::clone(&notify);
        server.register_raw(
            "trigger",
            Arc::new(move |_ctx, _params| {
                let events = Arc::clone(&trigger_events);
                let notify = Arc::clone(&trigger_notify);
                Box::pin(async move {
                    events.lock().await.push("trigger_started");
                    notify.notify_one();
                    events.lock().await.push("trigger_end");
                    Ok(serde_json::json!({}))
                })
            }),
        );

        client.spawn_receive_loop();
        server.spawn_receive_loop();
        client
            .initialize(Implementation::new("mcprs-test-client", "0.1.0"), ClientCapabilities::default())
            .await
            .unwrap();

        let sleep_client = Arc::clone(&client);
        let sleep_handle =
            tokio::spawn(async move { sleep_client.send_request_typed("sleep", serde_json::json!({})).await });
        // give the server time to enter `sleep` and register as
        // "waiting_for_event" before `trigger` is dispatched.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let trigger_result = client.send_request_typed("trigger", serde_json::json!({})).await;
        let sleep_result = sleep_handle.await.unwrap();

        assert!(trigger_result.is_ok());
        assert!(sleep_result.is_ok());
        assert_eq!(
            *events.lock().await,
            vec!["sleep:waiting_for_event", "trigger_started", "trigger_end", "sleep:tool_end"],
        );
    }
}
