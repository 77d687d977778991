//! The HTTP+SSE server session layer (spec.md §4.7-§4.8, components C7/C8):
//! stateful and stateless transports over the shared `mcprs-engine` peer
//! runtime, and the per-stream event store backing resumable SSE.

pub mod event_store;
pub mod http;

pub use event_store::{EventStore, StoredEvent};
pub use http::{
    build_router, build_stateless_router, is_valid_session_id, Authenticator, HttpAppState,
    HttpChannelTransport, HttpSession, NoAuthenticator, SessionIdGenerator, SessionRegistry,
    SessionState, SessionTemplate, StatelessAppState, UuidSessionIdGenerator, MAX_BODY_BYTES,
    MCP_ENDPOINT_PATH,
};
