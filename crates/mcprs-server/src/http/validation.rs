//! The validation pipeline that runs before routing (spec.md §4.7): content
//! negotiation, body size, session-id format, protocol-version header, and
//! authentication. New; grounded on the `validate_security` step in
//! `turbomcp-server/src/runtime/http.rs` generalized from a single
//! Origin/rate-limit check into the composable chain spec.md describes, plus
//! the status-code table in spec.md §6.

use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::http::session::is_valid_session_id;

/// Bounds the size of a single POST body. Chosen to comfortably hold a
/// batch of typical tool-call requests while still bounding memory; hosts
/// that need a different limit can swap the `tower_http::limit` layer
/// [`crate::http::routes::build_router`] installs.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The outcome of one validation step: proceed, or short-circuit the
/// request with a status and reason (spec.md: "A validator returns a
/// response to short-circuit or continues").
pub type ValidationResult = Result<(), (StatusCode, &'static str)>;

/// Content-Type must be `application/json` on every POST (spec.md §6).
pub fn check_content_type(headers: &HeaderMap) -> ValidationResult {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/json") {
        Ok(())
    } else {
        Err((StatusCode::UNSUPPORTED_MEDIA_TYPE, "Content-Type must be application/json"))
    }
}

/// POST `Accept` must contain both `application/json` and
/// `text/event-stream` (spec.md §6).
pub fn check_post_accept(headers: &HeaderMap) -> ValidationResult {
    let accept = accept_header(headers);
    if accept.contains("application/json") && accept.contains("text/event-stream") {
        Ok(())
    } else {
        Err((StatusCode::NOT_ACCEPTABLE, "Accept must include application/json and text/event-stream"))
    }
}

/// GET `Accept` must contain `text/event-stream` (spec.md §4.7 "GET").
pub fn check_get_accept(headers: &HeaderMap) -> ValidationResult {
    if accept_header(headers).contains("text/event-stream") {
        Ok(())
    } else {
        Err((StatusCode::NOT_ACCEPTABLE, "Accept must include text/event-stream"))
    }
}

fn accept_header(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Validates the format of an `Mcp-Session-Id` header value if present.
/// Absence is not itself a format error — routing decides whether the
/// method requires one.
pub fn check_session_id_format(headers: &HeaderMap) -> ValidationResult {
    match session_id_header(headers) {
        Some(id) if !is_valid_session_id(id) => {
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Mcp-Session-Id contains control characters or whitespace"))
        }
        _ => Ok(()),
    }
}

#[must_use]
pub fn session_id_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("Mcp-Session-Id").and_then(|v| v.to_str().ok())
}

/// `Mcp-Protocol-Version` is read but never required (spec.md §6: "absence
/// tolerated"); callers that care about a mismatch can compare it against
/// the session's negotiated version themselves.
#[must_use]
pub fn protocol_version_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("Mcp-Protocol-Version").and_then(|v| v.to_str().ok())
}

#[must_use]
pub fn last_event_id_header(headers: &HeaderMap) -> Option<u64> {
    headers.get("Last-Event-Id").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

/// Authenticates an inbound HTTP request into the opaque `AuthInfo` spec.md
/// §4.6 surfaces to handlers. Spec.md §1 places real authentication out of
/// scope ("authentication beyond surfacing an opaque `AuthInfo`"); this is
/// the seam a host plugs a real validator into.
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means "unauthenticated but allowed"; `Err` rejects the
    /// request outright.
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Value>, (StatusCode, &'static str)>;
}

/// The default authenticator: every request is allowed through with no
/// `AuthInfo`.
#[derive(Debug, Default)]
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<Value>, (StatusCode, &'static str)> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[test]
    fn content_type_must_be_json() {
        assert!(check_content_type(&headers_with(&[("content-type", "application/json")])).is_ok());
        assert!(check_content_type(&headers_with(&[("content-type", "text/plain")])).is_err());
        assert!(check_content_type(&HeaderMap::new()).is_err());
    }

    #[test]
    fn post_accept_requires_both_media_types() {
        assert!(check_post_accept(&headers_with(&[("accept", "application/json, text/event-stream")])).is_ok());
        assert!(check_post_accept(&headers_with(&[("accept", "application/json")])).is_err());
    }

    #[test]
    fn get_accept_requires_event_stream_only() {
        assert!(check_get_accept(&headers_with(&[("accept", "text/event-stream")])).is_ok());
        assert!(check_get_accept(&headers_with(&[("accept", "application/json")])).is_err());
    }

    #[test]
    fn session_id_format_rejects_whitespace() {
        assert!(check_session_id_format(&headers_with(&[("mcp-session-id", "abc-123")])).is_ok());
        assert!(check_session_id_format(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn no_authenticator_always_allows() {
        assert_eq!(NoAuthenticator.authenticate(&HeaderMap::new()).unwrap(), None);
    }
}
