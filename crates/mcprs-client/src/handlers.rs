//! Handler traits for the server-initiated requests a Client peer must be
//! able to answer: `roots/list`, `sampling/createMessage`,
//! `elicitation/create` (SPEC_FULL.md supplemented feature 5 — the symmetric
//! counterpart of the server-side handler registry described in spec.md
//! §4.9). Grounded on the trait shape of `turbomcp-client/src/handlers.rs`,
//! trimmed of its LLM-backend and resource-update machinery (out of
//! spec.md's scope).

use async_trait::async_trait;
use mcprs_protocol::catalog::{CreateMessageParams, CreateMessageResult, ElicitParams, ElicitResult, ListRootsResult};
use thiserror::Error;

/// Errors a handler may return; mapped onto `McpError` by the registration
/// glue in [`crate::builder::ClientBuilder::build`].
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("user declined the request")]
    Declined,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("handler error: {0}")]
    Other(String),
}

/// Answers `roots/list`: the filesystem/workspace roots this client exposes.
#[async_trait]
pub trait RootsProvider: Send + Sync {
    async fn list_roots(&self) -> Result<ListRootsResult, HandlerError>;
}

/// Answers `sampling/createMessage`: hands a sampling request to whatever
/// LLM backend the host wires in. The backend itself is out of scope here —
/// this crate only carries the protocol plumbing, matching spec.md §1's
/// framing of sampling as an opaque request/response exchange.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, HandlerError>;
}

/// Answers `elicitation/create`: asks the end user for the requested input.
#[async_trait]
pub trait ElicitationHandler: Send + Sync {
    async fn elicit(&self, params: ElicitParams) -> Result<ElicitResult, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysDecline;

    #[async_trait]
    impl ElicitationHandler for AlwaysDecline {
        async fn elicit(&self, _params: ElicitParams) -> Result<ElicitResult, HandlerError> {
            Ok(ElicitResult { action: mcprs_protocol::catalog::ElicitAction::Decline, content: None })
        }
    }

    #[tokio::test]
    async fn handler_trait_is_object_safe_and_callable() {
        let handler: std::sync::Arc<dyn ElicitationHandler> = std::sync::Arc::new(AlwaysDecline);
        let result = handler
            .elicit(ElicitParams { message: "ok?".into(), requested_schema: None, url: None })
            .await
            .unwrap();
        assert_eq!(result.action, mcprs_protocol::catalog::ElicitAction::Decline);
    }
}
