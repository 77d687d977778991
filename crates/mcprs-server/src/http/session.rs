//! The channel-backed [`mcprs_transport::Transport`] that sits behind every
//! HTTP session (and the single shared stateless endpoint), plus the
//! session table. Grounded on `mcprs-transport`'s `MemoryTransport` (linked
//! `mpsc` queues) for the inbound half, and on the `Session`/broadcast
//! pattern in `turbomcp-transport/src/streamable_http_v2.rs` for the
//! outbound half — replaced there with a `tokio::sync::broadcast` channel so
//! any number of SSE readers (the standalone GET stream, each POST's
//! dedicated stream) can tap the same outbound frame sequence independently.

use async_trait::async_trait;
use bytes::Bytes;
use mcprs_engine::{Peer, PeerConfig, PeerRole};
use mcprs_protocol::{GatingMode, Implementation, ProtocolVersion, ServerCapabilities};
use mcprs_transport::{Transport, TransportError, TransportResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

const BROADCAST_CAPACITY: usize = 256;

/// A duplex byte channel that feeds a [`Peer`]: `send` broadcasts every
/// outbound frame to whatever SSE readers are currently subscribed (dropping
/// it if none are, since nothing is waiting); `receive` drains frames pushed
/// in from HTTP request bodies via [`HttpChannelTransport::push_inbound`].
#[derive(Debug)]
pub struct HttpChannelTransport {
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    outbound: broadcast::Sender<Bytes>,
    connected: AtomicBool,
}

impl HttpChannelTransport {
    #[must_use]
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { inbound_tx, inbound_rx: Mutex::new(inbound_rx), outbound, connected: AtomicBool::new(true) }
    }

    /// Feed one inbound frame (a POST body) into the transport's receive
    /// side, as if it had arrived over the wire.
    pub fn push_inbound(&self, frame: Bytes) -> TransportResult<()> {
        self.inbound_tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    /// Subscribe to every frame the peer sends from this point on. Used by
    /// both the standalone GET stream and each POST's dedicated stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.outbound.subscribe()
    }
}

impl Default for HttpChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpChannelTransport {
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound_rx.lock().await.close();
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        // No subscribers is not an error: the frame is simply not observed
        // by any currently-open stream (e.g. a notification sent while no
        // GET stream is open).
        let _ = self.outbound.send(frame);
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.inbound_rx.lock().await.recv().await)
    }
}

/// The three states a session's lifecycle passes through (spec.md §3's
/// Session record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    Terminated,
}

/// One stateful HTTP session: its transport, its peer, and the bookkeeping
/// the routing layer needs (standalone-stream exclusivity, lifecycle state).
pub struct HttpSession {
    pub id: String,
    pub transport: Arc<HttpChannelTransport>,
    pub peer: Arc<Peer<HttpChannelTransport>>,
    state: parking_lot::Mutex<SessionState>,
    standalone_open: AtomicBool,
}

impl HttpSession {
    #[must_use]
    pub fn new(id: String, config: PeerConfig) -> Arc<Self> {
        let transport = Arc::new(HttpChannelTransport::new());
        let peer = Peer::new(Arc::clone(&transport), config);
        peer.spawn_receive_loop();
        Arc::new(Self {
            id,
            transport,
            peer,
            state: parking_lot::Mutex::new(SessionState::Initializing),
            standalone_open: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn mark_active(&self) {
        *self.state.lock() = SessionState::Active;
    }

    pub fn mark_terminated(&self) {
        *self.state.lock() = SessionState::Terminated;
    }

    /// Claim the standalone SSE stream slot. `false` if one is already open
    /// (spec.md §4.7: "Only one standalone stream per session; a second →
    /// 409").
    #[must_use]
    pub fn try_open_standalone_stream(&self) -> bool {
        self.standalone_open.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn close_standalone_stream(&self) {
        self.standalone_open.store(false, Ordering::SeqCst);
    }
}

/// A string matching `/[\x21-\x7E]+/`: visible ASCII, no whitespace.
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| (0x21..=0x7E).contains(&(c as u32)))
}

/// Generates session ids. Pluggable per spec.md §4.7's "SessionIdGenerator"
/// (session creation fails with 500 if the generator ever returns a
/// non-conforming string); the default always conforms.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Debug, Default)]
pub struct UuidSessionIdGenerator;

impl SessionIdGenerator for UuidSessionIdGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// The live session table. Single-writer through `DashMap`'s sharded locks,
/// per spec.md §5's "per-session stream maps are single-writer".
#[derive(Default)]
pub struct SessionRegistry {
    sessions: dashmap::DashMap<String, Arc<HttpSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<HttpSession>) {
        self.sessions.insert(session.id.clone(), session);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<HttpSession>> {
        self.sessions.get(id).map(|e| Arc::clone(&e))
    }

    /// Removes and terminates a session: marks it `Terminated` (further
    /// lookups by id observe 404) and disconnects its transport, which
    /// cancels its in-flight inbound handler tasks by closing the receive
    /// loop and failing any of its own pending outbound calls.
    pub async fn terminate(&self, id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.mark_terminated();
            let _ = session.transport.disconnect().await;
            true
        } else {
            false
        }
    }
}

/// Shared, transport-agnostic identity/capability configuration every new
/// session's [`Peer`] is constructed with.
pub struct SessionTemplate {
    pub implementation: Implementation,
    pub capabilities: ServerCapabilities,
    pub supported_versions: Vec<ProtocolVersion>,
    pub gating: GatingMode,
}

impl SessionTemplate {
    #[must_use]
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            role: PeerRole::Server,
            implementation: self.implementation.clone(),
            client_capabilities: mcprs_protocol::ClientCapabilities::default(),
            server_capabilities: self.capabilities.clone(),
            supported_versions: self.supported_versions.clone(),
            gating: self.gating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_validation_rejects_whitespace_and_control_chars() {
        assert!(is_valid_session_id("abc-123"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id("tab\tchar"));
    }

    #[test]
    fn standalone_stream_slot_is_exclusive() {
        let config = SessionTemplate {
            implementation: Implementation::new("test", "0.1.0"),
            capabilities: ServerCapabilities::default(),
            supported_versions: vec!["2025-06-18".to_string()],
            gating: GatingMode::Lenient,
        };
        let session = HttpSession::new("s1".to_string(), config.peer_config());
        assert!(session.try_open_standalone_stream());
        assert!(!session.try_open_standalone_stream());
        session.close_standalone_stream();
        assert!(session.try_open_standalone_stream());
    }

    #[tokio::test]
    async fn registry_terminate_makes_session_unreachable() {
        let config = SessionTemplate {
            implementation: Implementation::new("test", "0.1.0"),
            capabilities: ServerCapabilities::default(),
            supported_versions: vec!["2025-06-18".to_string()],
            gating: GatingMode::Lenient,
        };
        let registry = SessionRegistry::new();
        let session = HttpSession::new("s1".to_string(), config.peer_config());
        registry.insert(session);
        assert!(registry.get("s1").is_some());
        assert!(registry.terminate("s1").await);
        assert!(registry.get("s1").is_none());
        assert!(!registry.terminate("s1").await);
    }
}
