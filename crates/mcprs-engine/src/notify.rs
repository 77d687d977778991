//! Notification bus (spec.md §4.9, C9) and the progress-observer table
//! (§4.4 "Progress"). Grounded on the method-indexed handler-table idea
//! used throughout `turbomcp-server`'s handler registration (`handlers.rs`:
//! `Arc<dyn Fn(...) -> BoxFuture<...> + Send + Sync>`), applied uniformly to
//! inbound notifications here; the same shape backs the inbound
//! server-initiated request table in [`crate::peer`].

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A progress correlation token: string or integer per spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl ProgressToken {
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

/// A single `notifications/progress` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub progress: f64,
    pub total: Option<f64>,
    pub message: Option<String>,
}

type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;
type ProgressHandler = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Method-indexed table of inbound notification handlers. At most one
/// handler per method name; unregistered methods are logged and dropped
/// (spec.md §4.9: "absence → silently drop" — we still emit a debug trace,
/// which is an ambient-logging addition, not a protocol behavior change).
#[derive(Default)]
pub struct NotificationBus {
    handlers: DashMap<String, NotificationHandler>,
    progress: DashMap<ProgressToken, ProgressHandler>,
}

impl NotificationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `method`.
    pub fn on<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Dispatch an inbound notification. Runs the handler on its own task so
    /// the receive loop is never blocked by handler work.
    pub fn dispatch(&self, method: &str, params: Value) {
        match self.handlers.get(method) {
            Some(handler) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler(params).await });
            }
            None => debug!(method, "notify: no handler registered, dropping"),
        }
    }

    /// Register an observer for progress events carrying `token`.
    pub fn on_progress<F>(&self, token: ProgressToken, handler: F)
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.insert(token, Arc::new(handler));
    }

    pub fn remove_progress_observer(&self, token: &ProgressToken) {
        self.progress.remove(token);
    }

    /// Route an inbound `notifications/progress` to its registered
    /// observer. Orphan tokens (no observer registered) are logged and
    /// dropped, per spec.md §4.4.
    pub fn dispatch_progress(&self, token: &ProgressToken, event: ProgressEvent) {
        match self.progress.get(token) {
            Some(handler) => handler(event),
            None => warn!(?token, "notify: progress for unknown token, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn registered_handler_runs_on_dispatch() {
        let bus = NotificationBus::new();
        let seen = Arc::new(AtomicBool::new(false));
        let seen_clone = Arc::clone(&seen);
        bus.on("notifications/initialized", move |_| {
            let seen = Arc::clone(&seen_clone);
            Box::pin(async move {
                seen.store(true, Ordering::SeqCst);
            })
        });
        bus.dispatch("notifications/initialized", Value::Null);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn progress_dispatch_to_unknown_token_does_not_panic() {
        let bus = NotificationBus::new();
        bus.dispatch_progress(
            &ProgressToken::String("orphan".into()),
            ProgressEvent { progress: 0.5, total: None, message: None },
        );
    }

    #[test]
    fn progress_token_from_value_rejects_non_scalar() {
        assert!(ProgressToken::from_value(&serde_json::json!({"a":1})).is_none());
        assert_eq!(
            ProgressToken::from_value(&serde_json::json!("tok")),
            Some(ProgressToken::String("tok".into()))
        );
    }
}
