//! Thin typed-convenience client wrapper over the `mcprs-engine` peer
//! runtime (spec.md §4.4/§4.5 from the Client side, SPEC_FULL.md's
//! `mcprs-client` crate entry). Not a second protocol implementation: every
//! call here is a direct pass-through to [`mcprs_engine::Peer`], generic
//! over whichever [`mcprs_transport::Transport`] the host selects.

pub mod builder;
pub mod client;
pub mod error;
pub mod handlers;

pub use builder::ClientBuilder;
pub use client::Client;
pub use error::ClientError;
pub use handlers::{ElicitationHandler, HandlerError, RootsProvider, SamplingHandler};
