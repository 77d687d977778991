//! Outbound request correlation table (spec.md §4.4 "Outbound request
//! path"), grounded on the oneshot + pending-map pattern in
//! `turbomcp-server/src/runtime/http.rs`'s `HttpDispatcher`, generalized
//! here from HTTP-only to every transport.

use dashmap::DashMap;
use mcprs_core::{McpError, RequestId};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;

/// Everything an outbound call's awaiter can fail with, per spec.md §4.4
/// ("resolves with the decoded result or fails with a decoded `MCPError`,
/// `CancellationError`, `connectionClosed`, or a deadline expiry").
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Remote(#[from] McpError),
    #[error("request cancelled{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled { reason: Option<String> },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
}

/// What an outbound request resolves to once its response arrives (or it is
/// cancelled / the connection drops / a deadline expires).
pub type PendingResult = Result<serde_json::Value, CallError>;

struct PendingRequest {
    responder: oneshot::Sender<PendingResult>,
}

/// Tracks in-flight outbound requests keyed by the id we assigned them.
/// Single-writer per id: exactly one of `resolve`/`cancel`/`fail_all` ever
/// completes a given entry's responder.
pub struct CorrelationTable {
    next_id: AtomicI64,
    pending: DashMap<RequestId, PendingRequest>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: AtomicI64::new(1), pending: DashMap::new() }
    }

    /// Allocate a fresh request id. Monotonically increasing within this
    /// process; never reused even after the entry is removed.
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a pending outbound request, returning the receiver half the
    /// caller awaits on.
    pub fn insert(&self, id: RequestId) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, PendingRequest { responder: tx });
        rx
    }

    /// Resolve a pending request with its decoded response. `Ok(())` if the
    /// id was known and still pending; `Err(())` (logged by the caller) if
    /// the id is unknown or was already resolved/cancelled.
    pub fn resolve(&self, id: &RequestId, result: PendingResult) -> Result<(), ()> {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                let _ = entry.responder.send(result);
                Ok(())
            }
            None => Err(()),
        }
    }

    /// Remove a pending entry, resolving its responder with
    /// `CallError::Cancelled` (used by explicit cancellation and deadline
    /// expiry) rather than silently dropping it, so the awaiting side
    /// observes that variant instead of a bare closed-channel
    /// `ConnectionClosed` (spec.md §4.4/§8 scenario 1: "Client's awaiter
    /// fails with `CancellationError`").
    pub fn remove(&self, id: &RequestId, reason: Option<String>) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                let _ = entry.responder.send(Err(CallError::Cancelled { reason }));
                true
            }
            None => false,
        }
    }

    /// Fail every still-pending request with the same error (used on
    /// `disconnect`).
    pub fn fail_all(&self, make_error: impl Fn() -> CallError) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.responder.send(Err(make_error()));
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_the_waiting_receiver() {
        let table = CorrelationTable::new();
        let id = table.next_id();
        let rx = table.insert(id.clone());
        table.resolve(&id, Ok(serde_json::json!(42))).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), serde_json::json!(42));
    }

    #[test]
    fn resolve_unknown_id_is_an_error() {
        let table = CorrelationTable::new();
        assert!(table.resolve(&RequestId::Number(999), Ok(serde_json::json!(null))).is_err());
    }

    #[tokio::test]
    async fn fail_all_resolves_every_pending_entry() {
        let table = CorrelationTable::new();
        let id_a = table.next_id();
        let id_b = table.next_id();
        let rx_a = table.insert(id_a);
        let rx_b = table.insert(id_b);
        table.fail_all(|| CallError::ConnectionClosed);
        assert!(rx_a.await.unwrap().is_err());
        assert!(rx_b.await.unwrap().is_err());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn remove_resolves_the_responder_with_cancelled() {
        let table = CorrelationTable::new();
        let id = table.next_id();
        let rx = table.insert(id.clone());
        assert!(table.remove(&id, Some("no longer needed".to_string())));
        assert!(!table.contains(&id));
        match rx.await.unwrap() {
            Err(CallError::Cancelled { reason }) => assert_eq!(reason.as_deref(), Some("no longer needed")),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}
