//! HTTP transport surface (spec.md §4.7, C7): the stateful session-aware
//! router, the stateless single-peer variant, the validation pipeline that
//! runs ahead of both, and the channel-backed transport/session plumbing
//! they share.

pub mod routes;
pub mod session;
pub mod stateless;
pub mod validation;

pub use routes::{build_router, HttpAppState, MCP_ENDPOINT_PATH};
pub use session::{
    is_valid_session_id, HttpChannelTransport, HttpSession, SessionIdGenerator, SessionRegistry,
    SessionState, SessionTemplate, UuidSessionIdGenerator,
};
pub use stateless::{build_stateless_router, StatelessAppState};
pub use validation::{Authenticator, NoAuthenticator, MAX_BODY_BYTES};
