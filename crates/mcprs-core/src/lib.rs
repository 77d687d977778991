//! Wire types for the MCP peer runtime.
//!
//! This crate defines the JSON-RPC 2.0 envelope, request identifiers, the
//! closed `MCPError` taxonomy, and the `_meta`/general-fields carrier shared
//! by every other crate in the workspace. It has no opinion on transports or
//! dispatch — see `mcprs-transport` and `mcprs-engine` for those.

pub mod envelope;
pub mod error;
pub mod meta;

pub use envelope::{
    Batch, EnvelopeFields, Frame, JsonRpcVersion, Notification, Request, RequestId, Response,
    SingleFrame,
};
pub use error::{ErrorCode, McpError};
pub use meta::{GeneralFields, Meta};
