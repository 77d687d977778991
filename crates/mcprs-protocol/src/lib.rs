//! MCP wire-level protocol types layered on `mcprs-core`'s JSON-RPC
//! envelope: capability negotiation, the `initialize` handshake, the
//! generic `Method` trait, and an example catalog of domain methods.

pub mod capabilities;
pub mod catalog;
pub mod handshake;
pub mod method;

pub use capabilities::{ClientCapabilities, GatedMethod, ServerCapabilities};
pub use handshake::{
    check_gate, negotiate_version, negotiate_version_or_fail, GatingMode, HandshakeState,
    Implementation, InitializeRequest, InitializeResult, InitializedNotification, ProtocolVersion,
};
pub use method::{Empty, Method};
