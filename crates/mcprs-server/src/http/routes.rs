//! The stateful HTTP+SSE router (spec.md §4.7, C7): one endpoint, `POST`
//! creates sessions and dispatches into them, `GET` opens the standalone
//! SSE stream, `DELETE` tears a session down. Grounded on
//! `turbomcp-server/src/runtime/http.rs`'s `run_http`/`mcp_post_handler`/
//! `mcp_get_handler`/`mcp_delete_handler`, restructured around
//! [`super::session::HttpChannelTransport`]'s shared broadcast instead of
//! the teacher's per-pending-request oneshot map: every outbound frame is
//! pushed through one broadcast channel per session, and each stream (a
//! POST's response stream, the standalone GET stream) independently
//! filters the ids it cares about out of that same feed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use mcprs_core::{Frame, McpError, Request, RequestId, SingleFrame};
use serde_json::Value;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{trace, warn};

use crate::event_store::EventStore;
use crate::http::session::{HttpSession, SessionIdGenerator, SessionRegistry, SessionTemplate};
use crate::http::validation::{self, Authenticator, MAX_BODY_BYTES};

/// The sole path this router answers on; a host mounts it wherever it
/// likes and nests this router under that prefix.
pub const MCP_ENDPOINT_PATH: &str = "/mcp";

const METHOD_INITIALIZE: &str = "initialize";

/// Shared state behind the stateful router.
pub struct HttpAppState {
    pub sessions: Arc<SessionRegistry>,
    pub events: Arc<EventStore>,
    pub id_generator: Arc<dyn SessionIdGenerator>,
    pub template: Arc<SessionTemplate>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Invoked with a session's id once it is torn down via `DELETE`
    /// (spec.md §4.7 "invokes `onSessionClosed(sessionId)`").
    pub on_session_closed: Option<Arc<dyn Fn(String) + Send + Sync>>,
}

/// Mounts the stateful `POST`/`GET`/`DELETE` handlers at
/// [`MCP_ENDPOINT_PATH`]; any other method is auto-405'd by axum.
#[must_use]
pub fn build_router(state: Arc<HttpAppState>) -> Router {
    Router::new()
        .route(MCP_ENDPOINT_PATH, post(post_handler).get(get_handler).delete(delete_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

pub(crate) fn into_single_frames(frame: Frame) -> Vec<SingleFrame> {
    match frame {
        Frame::Request(r) => vec![SingleFrame::Request(*r)],
        Frame::Notification(n) => vec![SingleFrame::Notification(*n)],
        Frame::Response(r) => vec![SingleFrame::Response(*r)],
        Frame::Batch(b) => b.0,
    }
}

pub(crate) fn error_body(status: StatusCode, id: Option<RequestId>, err: McpError) -> Response {
    let envelope = mcprs_core::Response::error(id, &err);
    (status, Json(serde_json::to_value(envelope).unwrap_or(Value::Null))).into_response()
}

async fn post_handler(State(state): State<Arc<HttpAppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err((status, msg)) = validation::check_content_type(&headers) {
        return (status, msg).into_response();
    }
    if let Err((status, msg)) = validation::check_post_accept(&headers) {
        return (status, msg).into_response();
    }
    if let Err((status, msg)) = validation::check_session_id_format(&headers) {
        return (status, msg).into_response();
    }
    trace!(protocol_version = ?validation::protocol_version_header(&headers), "post: validated headers");

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, None, McpError::parse_error(err.to_string())),
    };
    let frame = match Frame::decode(parsed) {
        Ok(f) => f,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, None, err),
    };
    let was_batch = matches!(frame, Frame::Batch(_));
    let items = into_single_frames(frame);
    let requests: Vec<Request> = items
        .iter()
        .filter_map(|f| if let SingleFrame::Request(r) = f { Some(r.clone()) } else { None })
        .collect();
    let has_init = requests.iter().any(|r| r.method == METHOD_INITIALIZE);

    if has_init && was_batch {
        return error_body(StatusCode::BAD_REQUEST, None, McpError::invalid_request("batched initialize is not permitted"));
    }

    if has_init {
        return handle_initialize(&state, &headers, &body, &requests[0]).await;
    }

    let Some(session_id) = validation::session_id_header(&headers).map(str::to_string) else {
        return error_body(StatusCode::BAD_REQUEST, None, McpError::invalid_request("Mcp-Session-Id required"));
    };
    let Some(session) = state.sessions.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if requests.is_empty() {
        if let Err(err) = session.transport.push_inbound(body) {
            warn!(%err, session_id, "failed to deliver notification-only POST body");
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let expected: HashSet<RequestId> = requests.iter().map(|r| r.id.clone()).collect();
    let rx = session.transport.subscribe();
    if let Err(err) = session.transport.push_inbound(body) {
        warn!(%err, session_id, "failed to deliver POST body");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, None, McpError::internal_error(err.to_string()));
    }

    let stream_id = format!("post:{}:{}", session_id, uuid::Uuid::new_v4());
    let stream = response_stream(expected, rx, Arc::clone(&state.events), stream_id);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn handle_initialize(state: &Arc<HttpAppState>, headers: &HeaderMap, body: &Bytes, request: &Request) -> Response {
    let auth_info = match state.authenticator.authenticate(headers) {
        Ok(info) => info,
        Err((status, msg)) => return (status, msg).into_response(),
    };

    let session_id = state.id_generator.generate();
    if !crate::http::session::is_valid_session_id(&session_id) {
        return error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            McpError::internal_error("session id generator produced a non-conforming id"),
        );
    }

    let session = HttpSession::new(session_id.clone(), state.template.peer_config());
    session.peer.set_auth_info(auth_info);
    let standalone_close = {
        let session = Arc::clone(&session);
        Arc::new(move || session.close_standalone_stream()) as mcprs_engine::CloseStreamHook
    };
    session.peer.set_sse_hooks(Arc::clone(&standalone_close), standalone_close);
    state.sessions.insert(Arc::clone(&session));
    session.mark_active();

    let expected: HashSet<RequestId> = [request.id.clone()].into_iter().collect();
    let rx = session.transport.subscribe();
    if let Err(err) = session.transport.push_inbound(body.clone()) {
        warn!(%err, session_id, "failed to deliver initialize body");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, None, McpError::internal_error(err.to_string()));
    }

    let stream_id = format!("post:{session_id}:init");
    let stream = response_stream(expected, rx, Arc::clone(&state.events), stream_id);
    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("Mcp-Session-Id", value);
    }
    response
}

async fn get_handler(State(state): State<Arc<HttpAppState>>, headers: HeaderMap) -> Response {
    if let Err((status, msg)) = validation::check_get_accept(&headers) {
        return (status, msg).into_response();
    }
    trace!(protocol_version = ?validation::protocol_version_header(&headers), "get: validated headers");
    let Some(session_id) = validation::session_id_header(&headers).map(str::to_string) else {
        return error_body(StatusCode::BAD_REQUEST, None, McpError::invalid_request("Mcp-Session-Id required"));
    };
    let Some(session) = state.sessions.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !session.try_open_standalone_stream() {
        return (StatusCode::CONFLICT, "a standalone stream is already open for this session").into_response();
    }

    let stream_id = format!("standalone:{session_id}");
    let replay = validation::last_event_id_header(&headers)
        .map(|after| state.events.replay_after(&stream_id, after))
        .unwrap_or_default();
    let rx = session.transport.subscribe();
    let stream = standalone_stream(replay, rx, Arc::clone(&state.events), stream_id, Arc::clone(&session));

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("Mcp-Session-Id", value);
    }
    response
}

async fn delete_handler(State(state): State<Arc<HttpAppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = validation::session_id_header(&headers).map(str::to_string) else {
        return error_body(StatusCode::BAD_REQUEST, None, McpError::invalid_request("Mcp-Session-Id required"));
    };
    if state.sessions.terminate(&session_id).await {
        state.events.discard_stream(&format!("standalone:{session_id}"));
        if let Some(hook) = &state.on_session_closed {
            hook(session_id);
        }
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Every `result`/`error` id(s) carried by one outbound wire payload
/// (single envelope or batch).
pub(crate) fn response_ids(value: &Value) -> Vec<RequestId> {
    match value {
        Value::Array(items) => items.iter().filter_map(response_id_of).collect(),
        other => response_id_of(other).into_iter().collect(),
    }
}

fn response_id_of(value: &Value) -> Option<RequestId> {
    let obj = value.as_object()?;
    if !(obj.contains_key("result") || obj.contains_key("error")) {
        return None;
    }
    serde_json::from_value(obj.get("id")?.clone()).ok()
}

struct ResponseStreamState {
    rx: broadcast::Receiver<Bytes>,
    remaining: HashSet<RequestId>,
    events: Arc<EventStore>,
    stream_id: String,
    primed: bool,
    done: bool,
}

/// A POST's dedicated response stream: a priming comment event, then every
/// response whose id is in `expected`, in the order received; closes once
/// `expected` is exhausted (spec.md §4.7, testable property #3).
fn response_stream(
    expected: HashSet<RequestId>,
    rx: broadcast::Receiver<Bytes>,
    events: Arc<EventStore>,
    stream_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = ResponseStreamState { rx, remaining: expected, events, stream_id, primed: false, done: false };
    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        if !state.primed {
            state.primed = true;
            let id = state.events.put(&state.stream_id, Value::Null);
            return Some((Ok(Event::default().id(id.to_string()).comment("stream-open")), state));
        }
        loop {
            match state.rx.recv().await {
                Ok(bytes) => {
                    let Ok(value) = serde_json::from_slice::<Value>(&bytes) else { continue };
                    let ids = response_ids(&value);
                    if ids.iter().any(|id| state.remaining.contains(id)) {
                        for id in &ids {
                            state.remaining.remove(id);
                        }
                        let event_id = state.events.put(&state.stream_id, value.clone());
                        if state.remaining.is_empty() {
                            state.done = true;
                        }
                        let event = Event::default().id(event_id.to_string()).json_data(&value).unwrap_or_default();
                        return Some((Ok(event), state));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    state.done = true;
                    return None;
                }
            }
        }
    })
}

struct StandaloneStreamState {
    replay: std::vec::IntoIter<crate::event_store::StoredEvent>,
    rx: broadcast::Receiver<Bytes>,
    events: Arc<EventStore>,
    stream_id: String,
    _guard: StandaloneGuard,
}

struct StandaloneGuard(Arc<HttpSession>);

impl Drop for StandaloneGuard {
    fn drop(&mut self) {
        self.0.close_standalone_stream();
    }
}

/// The session's long-lived standalone stream (spec.md §4.7 "GET"):
/// replays anything newer than `Last-Event-Id` first, then forwards live
/// frames indefinitely. Frees the standalone-stream slot when dropped
/// (client disconnect, or the session is torn down and the broadcast
/// channel closes).
fn standalone_stream(
    replay: Vec<crate::event_store::StoredEvent>,
    rx: broadcast::Receiver<Bytes>,
    events: Arc<EventStore>,
    stream_id: String,
    session: Arc<HttpSession>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = StandaloneStreamState {
        replay: replay.into_iter(),
        rx,
        events,
        stream_id,
        _guard: StandaloneGuard(session),
    };
    futures::stream::unfold(state, |mut state| async move {
        if let Some(stored) = state.replay.next() {
            let event = Event::default().id(stored.id.to_string()).json_data(&stored.payload).unwrap_or_default();
            return Some((Ok(event), state));
        }
        loop {
            match state.rx.recv().await {
                Ok(bytes) => {
                    let Ok(value) = serde_json::from_slice::<Value>(&bytes) else { continue };
                    let event_id = state.events.put(&state.stream_id, value.clone());
                    let event = Event::default().id(event_id.to_string()).json_data(&value).unwrap_or_default();
                    return Some((Ok(event), state));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_ids_reads_single_and_batched_envelopes() {
        let single = serde_json::json!({"jsonrpc":"2.0","id":1,"result":{}});
        assert_eq!(response_ids(&single), vec![RequestId::Number(1)]);

        let batch = serde_json::json!([
            {"jsonrpc":"2.0","id":1,"result":{}},
            {"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"nope"}}
        ]);
        let ids = response_ids(&batch);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&RequestId::Number(1)));
        assert!(ids.contains(&RequestId::String("x".to_string())));
    }

    #[test]
    fn response_ids_ignores_requests_and_notifications() {
        let request = serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"});
        assert!(response_ids(&request).is_empty());
        let notification = serde_json::json!({"jsonrpc":"2.0","method":"notifications/progress"});
        assert!(response_ids(&notification).is_empty());
    }

    fn test_state() -> Arc<HttpAppState> {
        Arc::new(HttpAppState {
            sessions: Arc::new(SessionRegistry::new()),
            events: Arc::new(EventStore::new(64)),
            id_generator: Arc::new(crate::http::session::UuidSessionIdGenerator),
            template: Arc::new(SessionTemplate {
                implementation: mcprs_protocol::Implementation::new("mcprs-test-server", "0.1.0"),
                capabilities: mcprs_protocol::ServerCapabilities::default(),
                supported_versions: vec!["2025-06-18".to_string()],
                gating: mcprs_protocol::GatingMode::Lenient,
            }),
            authenticator: Arc::new(crate::http::validation::NoAuthenticator),
            on_session_closed: None,
        })
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(axum::http::header::ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        headers
    }

    #[tokio::test]
    async fn post_rejects_wrong_content_type() {
        let state = test_state();
        let response = post_handler(State(state), HeaderMap::new(), Bytes::from_static(b"{}")).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn post_rejects_invalid_json() {
        let state = test_state();
        let response = post_handler(State(state), json_headers(), Bytes::from_static(b"not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_rejects_batched_initialize() {
        let state = test_state();
        let body = serde_json::json!([
            {"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"c","version":"1"}}}
        ]);
        let response = post_handler(State(state), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_without_session_id_on_non_initialize_is_bad_request() {
        let state = test_state();
        let body = serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"});
        let response = post_handler(State(state), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_with_unknown_session_id_is_not_found() {
        let state = test_state();
        let mut headers = json_headers();
        headers.insert("Mcp-Session-Id", HeaderValue::from_static("no-such-session"));
        let body = serde_json::json!({"jsonrpc":"2.0","id":1,"method":"ping"});
        let response = post_handler(State(state), headers, Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn initialize_post_creates_a_session_and_streams_the_result() {
        let state = test_state();
        let body = serde_json::json!({
            "jsonrpc":"2.0","id":1,"method":"initialize",
            "params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"c","version":"1"}}
        });
        let response = post_handler(State(Arc::clone(&state)), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = response
            .headers()
            .get("Mcp-Session-Id")
            .expect("session id header")
            .to_str()
            .unwrap()
            .to_string();
        assert!(crate::http::session::is_valid_session_id(&session_id));
        assert!(state.sessions.get(&session_id).is_some());
    }

    #[tokio::test]
    async fn delete_unknown_session_is_not_found() {
        let state = test_state();
        let mut headers = HeaderMap::new();
        headers.insert("Mcp-Session-Id", HeaderValue::from_static("ghost"));
        let response = delete_handler(State(state), headers).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_terminates_a_known_session() {
        let state = test_state();
        let body = serde_json::json!({
            "jsonrpc":"2.0","id":1,"method":"initialize",
            "params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"c","version":"1"}}
        });
        let init_response = post_handler(State(Arc::clone(&state)), json_headers(), Bytes::from(body.to_string())).await;
        let session_id = init_response.headers().get("Mcp-Session-Id").unwrap().to_str().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert("Mcp-Session-Id", HeaderValue::from_str(&session_id).unwrap());
        let response = delete_handler(State(Arc::clone(&state)), headers.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.sessions.get(&session_id).is_none());

        let again = delete_handler(State(state), headers).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }
}
