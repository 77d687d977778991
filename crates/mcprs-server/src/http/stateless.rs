//! The stateless HTTP variant (spec.md §4.7 "Stateless variant"): no
//! session table, one shared peer, `GET`/`DELETE` unsupported. Grounded on
//! the same broadcast-backed [`HttpChannelTransport`] the stateful router
//! uses, collapsed from a per-POST SSE stream into an await-then-respond
//! `application/json` reply.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mcprs_core::{Frame, McpError, Request, RequestId, SingleFrame};
use mcprs_engine::{Peer, PeerConfig};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::warn;

use crate::http::routes::{error_body, into_single_frames, response_ids};
use crate::http::session::HttpChannelTransport;
use crate::http::validation::{self, MAX_BODY_BYTES};

pub const MCP_ENDPOINT_PATH: &str = "/mcp";

/// Shared state behind the stateless router: one peer, constructed once
/// and reused by every POST.
pub struct StatelessAppState {
    pub transport: Arc<HttpChannelTransport>,
    pub peer: Arc<Peer<HttpChannelTransport>>,
}

impl StatelessAppState {
    #[must_use]
    pub fn new(config: PeerConfig) -> Arc<Self> {
        let transport = Arc::new(HttpChannelTransport::new());
        let peer = Peer::new(Arc::clone(&transport), config);
        // The stateless variant has no session/handshake concept (spec.md
        // §4.7): there is no `initialize` request to receive, so the
        // initialized barrier is satisfied up front rather than left
        // permanently blocking every domain POST.
        peer.mark_initialized();
        peer.spawn_receive_loop();
        Arc::new(Self { transport, peer })
    }
}

/// Mounts `POST` at [`MCP_ENDPOINT_PATH`]; `GET`/`DELETE` auto-405 by
/// simply never being routed (spec.md §4.7 "GET/DELETE → 405").
#[must_use]
pub fn build_stateless_router(state: Arc<StatelessAppState>) -> Router {
    Router::new()
        .route(MCP_ENDPOINT_PATH, post(post_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn post_handler(State(state): State<Arc<StatelessAppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err((status, msg)) = validation::check_content_type(&headers) {
        return (status, msg).into_response();
    }
    if let Err((status, msg)) = validation::check_post_accept(&headers) {
        return (status, msg).into_response();
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, None, McpError::parse_error(err.to_string())),
    };
    let frame = match Frame::decode(parsed) {
        Ok(f) => f,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, None, err),
    };
    let items = into_single_frames(frame);
    let requests: Vec<Request> = items
        .iter()
        .filter_map(|f| if let SingleFrame::Request(r) = f { Some(r.clone()) } else { None })
        .collect();

    if requests.is_empty() {
        if let Err(err) = state.transport.push_inbound(body) {
            warn!(%err, "stateless: failed to deliver notification-only POST body");
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let mut remaining: HashSet<RequestId> = requests.iter().map(|r| r.id.clone()).collect();
    let mut rx = state.transport.subscribe();
    if let Err(err) = state.transport.push_inbound(body) {
        warn!(%err, "stateless: failed to deliver POST body");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, None, McpError::internal_error(err.to_string()));
    }

    let mut collected: Vec<Value> = Vec::new();
    loop {
        match rx.recv().await {
            Ok(bytes) => {
                let Ok(value) = serde_json::from_slice::<Value>(&bytes) else { continue };
                let ids = response_ids(&value);
                if !ids.iter().any(|id| remaining.contains(id)) {
                    continue;
                }
                for id in &ids {
                    remaining.remove(id);
                }
                match value {
                    Value::Array(items) => collected.extend(items),
                    other => collected.push(other),
                }
                if remaining.is_empty() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return error_body(StatusCode::INTERNAL_SERVER_ERROR, None, McpError::ConnectionClosed);
            }
        }
    }

    let body_value = if collected.len() == 1 { collected.remove(0) } else { Value::Array(collected) };
    (StatusCode::OK, Json(body_value)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use mcprs_engine::PeerRole;
    use mcprs_protocol::{ClientCapabilities, GatingMode, Implementation, ServerCapabilities};

    fn test_config() -> PeerConfig {
        PeerConfig {
            role: PeerRole::Server,
            implementation: Implementation::new("mcprs-test-server", "0.1.0"),
            client_capabilities: ClientCapabilities::default(),
            server_capabilities: ServerCapabilities::default(),
            supported_versions: vec!["2025-06-18".to_string()],
            gating: GatingMode::Lenient,
        }
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(axum::http::header::ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        headers
    }

    #[tokio::test]
    async fn notification_only_post_returns_202() {
        let state = StatelessAppState::new(test_config());
        let body = serde_json::json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let response = post_handler(State(state), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn single_request_post_returns_its_response_as_json() {
        let state = StatelessAppState::new(test_config());
        let body = serde_json::json!({"jsonrpc":"2.0","id":"x","method":"ping"});
        let response = post_handler(State(state), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(decoded, serde_json::json!({"jsonrpc":"2.0","id":"x","result":{}}));
    }

    /// spec.md §8 scenario 6, verbatim: a `tools/list` POST to a stateless
    /// transport whose handler returns `{tools:[]}` completes 200 with a
    /// body exactly equal to the encoded response — not an initialized-barrier
    /// error dressed in a 200 status.
    #[tokio::test]
    async fn stateless_tools_list_returns_the_handler_result_body() {
        let state = StatelessAppState::new(test_config());
        state.peer.register_raw(
            "tools/list",
            Arc::new(|_ctx, _params| Box::pin(async { Ok(serde_json::json!({"tools": []})) })),
        );
        let body = serde_json::json!({"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}});
        let response = post_handler(State(state), json_headers(), Bytes::from(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(decoded, serde_json::json!({"jsonrpc":"2.0","id":1,"result":{"tools":[]}}));
    }

    #[tokio::test]
    async fn invalid_json_body_is_bad_request() {
        let state = StatelessAppState::new(test_config());
        let response = post_handler(State(state), json_headers(), Bytes::from_static(b"{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
