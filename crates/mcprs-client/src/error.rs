//! The client's error type: a thin wrapper unifying transport failures and
//! outbound-call failures behind one `Result`, matching the
//! `turbomcp_core::Error::{transport, protocol}` convenience-constructor
//! pattern without carrying that type's tenancy/auth variants (out of
//! spec.md's scope).

use mcprs_engine::CallError;
use mcprs_transport::TransportError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("client is not initialized: call initialize() first")]
    NotInitialized,
}
