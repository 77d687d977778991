//! Per-request context types: the outbound awaiter handed back by `send`
//! (spec.md §4.4 step 2-3) and the inbound handler-facing context (C6,
//! spec.md §4.6). Grounded on
//! `turbomcp-protocol/src/context/request.rs`'s `RequestContext` (its
//! `cancellation_token: Option<Arc<CancellationToken>>` and
//! `server_to_client: Option<Arc<dyn ServerToClientRequests>>` upcall
//! pattern), trimmed to the fields spec.md §4.6 actually lists.

use crate::correlation::CallError;
use futures::future::BoxFuture;
use mcprs_core::{GeneralFields, McpError, RequestId};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upcalls a [`RequestContext`] uses to reach back into the owning peer:
/// emitting notifications, originating server-initiated requests, and
/// checking strict-mode capability gates before doing either. Implemented
/// by `crate::peer::Peer` and type-erased here so `context.rs` does not
/// depend on the concrete transport/handler generics `Peer<T>` carries.
pub trait PeerUpcalls: Send + Sync {
    fn send_notification(&self, method: &'static str, params: Value);
    fn send_request(&self, method: &'static str, params: Value) -> BoxFuture<'static, Result<Value, CallError>>;
    fn check_gate(&self, method: &str) -> Result<(), McpError>;
}

/// Idempotent close handle for an HTTP session's SSE stream. `None` on
/// non-HTTP transports.
pub type CloseStreamHook = Arc<dyn Fn() + Send + Sync>;

/// The object handed to an inbound request handler (spec.md §4.6).
pub struct RequestContext {
    pub request_id: RequestId,
    pub fields: Option<GeneralFields>,
    pub auth_info: Option<Value>,
    pub span: tracing::Span,
    cancellation: CancellationToken,
    upcalls: Arc<dyn PeerUpcalls>,
    close_sse_stream: Option<CloseStreamHook>,
    close_standalone_sse_stream: Option<CloseStreamHook>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("auth_info", &self.auth_info.is_some())
            .field("has_sse_hooks", &self.close_sse_stream.is_some())
            .finish()
    }
}

impl RequestContext {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        fields: Option<GeneralFields>,
        auth_info: Option<Value>,
        cancellation: CancellationToken,
        upcalls: Arc<dyn PeerUpcalls>,
    ) -> Self {
        let span = tracing::info_span!("inbound_request", id = %request_id);
        Self {
            request_id,
            fields,
            auth_info,
            span,
            cancellation,
            upcalls,
            close_sse_stream: None,
            close_standalone_sse_stream: None,
        }
    }

    /// Populate the SSE-close hooks; only the HTTP session layer does this.
    #[must_use]
    pub fn with_sse_hooks(mut self, close: CloseStreamHook, close_standalone: CloseStreamHook) -> Self {
        self.close_sse_stream = Some(close);
        self.close_standalone_sse_stream = Some(close_standalone);
        self
    }

    #[must_use]
    pub fn progress_token(&self) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.meta.as_ref()).and_then(|m| m.progress_token())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the handler's task has been cancelled via
    /// `notifications/cancelled`. Handlers that want to race long-running
    /// work against cancellation select on this.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Idempotent. No-op off HTTP transports.
    pub fn close_sse_stream(&self) {
        if let Some(hook) = &self.close_sse_stream {
            hook();
        }
    }

    /// Idempotent. No-op off HTTP transports.
    pub fn close_standalone_sse_stream(&self) {
        if let Some(hook) = &self.close_standalone_sse_stream {
            hook();
        }
    }

    /// Emits `notifications/progress`. Fails silently if the channel is
    /// closed, per spec.md §4.6.
    pub fn send_progress(&self, token: Value, progress: f64, total: Option<f64>, message: Option<String>) {
        let mut payload = serde_json::json!({ "progressToken": token, "progress": progress });
        if let Some(total) = total {
            payload["total"] = serde_json::json!(total);
        }
        if let Some(message) = message {
            payload["message"] = serde_json::json!(message);
        }
        self.upcalls.send_notification("notifications/progress", payload);
    }

    /// Emits `notifications/message` at `level`.
    pub fn log(&self, level: &str, logger: Option<String>, data: Value) {
        let mut payload = serde_json::json!({ "level": level, "data": data });
        if let Some(logger) = logger {
            payload["logger"] = serde_json::json!(logger);
        }
        self.upcalls.send_notification("notifications/message", payload);
    }

    /// Originates `elicitation/create` in form mode. Fails with
    /// `methodNotFound` in strict mode when the peer lacks the elicitation
    /// capability.
    pub async fn elicit(&self, message: String, schema: Value) -> Result<Value, McpError> {
        self.upcalls.check_gate("elicitation/create")?;
        let params = serde_json::json!({ "message": message, "requestedSchema": schema });
        self.upcalls
            .send_request("elicitation/create", params)
            .await
            .map_err(call_error_to_mcp)
    }

    /// Originates `elicitation/create` in URL mode.
    pub async fn elicit_url(&self, message: String, url: String, elicitation_id: String) -> Result<Value, McpError> {
        self.upcalls.check_gate("elicitation/create")?;
        let params = serde_json::json!({
            "message": message,
            "url": url,
            "elicitationId": elicitation_id,
        });
        self.upcalls
            .send_request("elicitation/create", params)
            .await
            .map_err(call_error_to_mcp)
    }

    /// Originates `sampling/createMessage`.
    pub async fn sample(&self, params: Value) -> Result<Value, McpError> {
        self.upcalls.check_gate("sampling/createMessage")?;
        self.upcalls
            .send_request("sampling/createMessage", params)
            .await
            .map_err(call_error_to_mcp)
    }
}

fn call_error_to_mcp(err: CallError) -> McpError {
    match err {
        CallError::Remote(e) => e,
        CallError::Cancelled { reason } => {
            McpError::internal_error(format!("cancelled: {}", reason.unwrap_or_default()))
        }
        CallError::ConnectionClosed => McpError::ConnectionClosed,
        CallError::Timeout => McpError::internal_error("timeout"),
    }
}

/// The awaiter an outbound caller receives from `send<M: Method>(params)`
/// (spec.md §4.4 step 3). A single-consumer future over the decoded result;
/// dropping it before completion, or calling [`OutboundCall::cancel`]
/// explicitly, sends `notifications/cancelled` and reclaims the pending
/// entry without waiting for a response.
pub struct OutboundCall {
    pub request_id: RequestId,
    receiver: Option<oneshot::Receiver<Result<Value, CallError>>>,
    on_drop: Option<Arc<dyn Fn(RequestId, Option<String>) + Send + Sync>>,
    completed: bool,
}

impl OutboundCall {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        receiver: oneshot::Receiver<Result<Value, CallError>>,
        on_drop: Arc<dyn Fn(RequestId, Option<String>) + Send + Sync>,
    ) -> Self {
        Self { request_id, receiver: Some(receiver), on_drop: Some(on_drop), completed: false }
    }

    /// Explicitly cancel: sends `notifications/cancelled{requestId, reason}`
    /// and resolves this awaiter with `CallError::Cancelled`.
    pub fn cancel(mut self, reason: Option<String>) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop(self.request_id.clone(), reason);
        }
        self.completed = true;
    }
}

impl Future for OutboundCall {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let receiver = self.receiver.as_mut().expect("OutboundCall polled after completion");
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.completed = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                self.completed = true;
                Poll::Ready(Err(CallError::ConnectionClosed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OutboundCall {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(on_drop) = self.on_drop.take() {
            warn!(id = %self.request_id, "outbound call dropped before completion, cancelling");
            on_drop(self.request_id.clone(), Some("dropped".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopUpcalls;
    impl PeerUpcalls for NoopUpcalls {
        fn send_notification(&self, _method: &'static str, _params: Value) {}
        fn send_request(&self, _method: &'static str, _params: Value) -> BoxFuture<'static, Result<Value, CallError>> {
            Box::pin(async { Ok(Value::Null) })
        }
        fn check_gate(&self, _method: &str) -> Result<(), McpError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dropping_an_unresolved_call_invokes_cancel_hook() {
        let (_tx, rx) = oneshot::channel::<Result<Value, CallError>>();
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let on_drop: Arc<dyn Fn(RequestId, Option<String>) + Send + Sync> =
            Arc::new(move |_id, _reason| called_clone.store(true, std::sync::atomic::Ordering::SeqCst));
        {
            let _call = OutboundCall::new(RequestId::Number(1), rx, on_drop);
        }
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn completed_call_does_not_invoke_cancel_hook() {
        let (tx, rx) = oneshot::channel::<Result<Value, CallError>>();
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let on_drop: Arc<dyn Fn(RequestId, Option<String>) + Send + Sync> =
            Arc::new(move |_id, _reason| called_clone.store(true, std::sync::atomic::Ordering::SeqCst));
        let call = OutboundCall::new(RequestId::Number(2), rx, on_drop);
        tx.send(Ok(serde_json::json!(1))).unwrap();
        let result = call.await;
        assert_eq!(result.unwrap(), serde_json::json!(1));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn request_context_exposes_progress_token() {
        let mut meta = mcprs_core::Meta::new();
        meta.set_progress_token(serde_json::json!("tok-1"));
        let fields = GeneralFields { meta: Some(meta), extra: Default::default() };
        let ctx = RequestContext::new(
            RequestId::Number(1),
            Some(fields),
            None,
            CancellationToken::new(),
            Arc::new(NoopUpcalls),
        );
        assert_eq!(ctx.progress_token(), Some(&serde_json::json!("tok-1")));
    }
}
