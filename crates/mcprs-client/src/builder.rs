//! `ClientBuilder`: a fluent constructor for [`Client`], mirroring
//! `turbomcp-client/src/client/builder.rs`'s builder pattern but trimmed to
//! the knobs spec.md's Client role actually has — capability flags, the
//! supported protocol-version list, gating mode, an optional outbound-call
//! timeout, and the three server-initiated-request handlers (roots,
//! sampling, elicitation) SPEC_FULL.md's feature 5 calls for.

use std::sync::Arc;
use std::time::Duration;

use mcprs_core::McpError;
use mcprs_engine::{Peer, PeerConfig, PeerRole, RequestContext};
use mcprs_protocol::catalog::{ElicitationCreate, RootsList, SamplingCreateMessage};
use mcprs_protocol::method::Empty;
use mcprs_protocol::{ClientCapabilities, ElicitationCapabilities, GatingMode, Implementation, ProtocolVersion, RootsCapabilities, SamplingCapabilities};
use mcprs_transport::Transport;

use crate::client::Client;
use crate::handlers::{ElicitationHandler, HandlerError, RootsProvider, SamplingHandler};

/// Default protocol version this crate negotiates when the caller does not
/// override `with_supported_versions`.
const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

pub struct ClientBuilder {
    implementation: Implementation,
    supported_versions: Vec<ProtocolVersion>,
    gating: GatingMode,
    call_timeout: Option<Duration>,
    roots: Option<Arc<dyn RootsProvider>>,
    sampling: Option<Arc<dyn SamplingHandler>>,
    elicitation: Option<Arc<dyn ElicitationHandler>>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            implementation: Implementation::new(name, version),
            supported_versions: vec![DEFAULT_PROTOCOL_VERSION.to_string()],
            gating: GatingMode::Lenient,
            call_timeout: None,
            roots: None,
            sampling: None,
            elicitation: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.implementation.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_supported_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.supported_versions = versions;
        self
    }

    #[must_use]
    pub fn with_gating(mut self, gating: GatingMode) -> Self {
        self.gating = gating;
        self
    }

    /// Every outbound `call`/`call_with_timeout` default-gated method
    /// (`logging/setLevel`, `completion/complete`) uses this timeout when
    /// set, cancelling with reason `"timeout"` if it elapses (spec.md §5).
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Registers a handler for inbound `roots/list` and advertises the
    /// `roots` capability during `initialize`.
    #[must_use]
    pub fn with_roots(mut self, provider: Arc<dyn RootsProvider>) -> Self {
        self.roots = Some(provider);
        self
    }

    /// Registers a handler for inbound `sampling/createMessage` and
    /// advertises the `sampling` capability.
    #[must_use]
    pub fn with_sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.sampling = Some(handler);
        self
    }

    /// Registers a handler for inbound `elicitation/create` and advertises
    /// the `elicitation` capability.
    #[must_use]
    pub fn with_elicitation(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation = Some(handler);
        self
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            experimental: None,
            roots: self.roots.as_ref().map(|_| RootsCapabilities { list_changed: Some(true) }),
            sampling: self.sampling.as_ref().map(|_| SamplingCapabilities),
            elicitation: self.elicitation.as_ref().map(|_| ElicitationCapabilities),
        }
    }

    /// Builds the [`Client`], wiring any registered handlers onto the
    /// engine before handing it back. Does not connect the transport or
    /// start the receive loop — call [`Client::connect`] and
    /// [`Client::spawn_receive_loop`] before [`Client::initialize`].
    #[must_use]
    pub fn build<T: Transport + 'static>(self, transport: Arc<T>) -> Client<T> {
        let capabilities = self.capabilities();
        let config = PeerConfig {
            role: PeerRole::Client,
            implementation: self.implementation.clone(),
            client_capabilities: capabilities.clone(),
            server_capabilities: mcprs_protocol::ServerCapabilities::default(),
            supported_versions: self.supported_versions.clone(),
            gating: self.gating,
        };
        let peer = Peer::new(Arc::clone(&transport), config);

        if let Some(provider) = self.roots {
            peer.register::<RootsList, _, _>(move |_ctx: RequestContext, _params: Empty| {
                let provider = Arc::clone(&provider);
                async move { provider.list_roots().await.map_err(handler_error_to_mcp) }
            });
        }
        if let Some(handler) = self.sampling {
            peer.register::<SamplingCreateMessage, _, _>(move |_ctx: RequestContext, params| {
                let handler = Arc::clone(&handler);
                async move { handler.create_message(params).await.map_err(handler_error_to_mcp) }
            });
        }
        if let Some(handler) = self.elicitation {
            peer.register::<ElicitationCreate, _, _>(move |_ctx: RequestContext, params| {
                let handler = Arc::clone(&handler);
                async move { handler.elicit(params).await.map_err(handler_error_to_mcp) }
            });
        }

        Client { transport, peer, implementation: self.implementation, capabilities, call_timeout: self.call_timeout }
    }
}

fn handler_error_to_mcp(err: HandlerError) -> McpError {
    match err {
        HandlerError::Declined => McpError::Application { code: -1, message: "declined".to_string(), data: None },
        HandlerError::InvalidInput(msg) => McpError::invalid_params(msg),
        HandlerError::Other(msg) => McpError::internal_error(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ElicitationHandler;
    use async_trait::async_trait;
    use mcprs_protocol::catalog::{ElicitAction, ElicitParams, ElicitResult};
    use mcprs_transport::MemoryTransport;

    struct AcceptAll;

    #[async_trait]
    impl ElicitationHandler for AcceptAll {
        async fn elicit(&self, _params: ElicitParams) -> Result<ElicitResult, HandlerError> {
            Ok(ElicitResult { action: ElicitAction::Accept, content: None })
        }
    }

    #[tokio::test]
    async fn elicitation_handler_sets_the_capability() {
        let (transport, _other) = mcprs_transport::create_connected_pair();
        let builder = ClientBuilder::new("mcprs-test-client", "0.1.0").with_elicitation(Arc::new(AcceptAll));
        let client: Client<MemoryTransport> = builder.build(Arc::new(transport));
        assert!(client.capabilities.elicitation.is_some());
        assert!(client.capabilities.roots.is_none());
    }

    #[tokio::test]
    async fn default_builder_advertises_no_optional_capabilities() {
        let (transport, _other) = mcprs_transport::create_connected_pair();
        let client: Client<MemoryTransport> =
            ClientBuilder::new("mcprs-test-client", "0.1.0").build(Arc::new(transport));
        assert_eq!(client.capabilities, ClientCapabilities::default());
    }
}
