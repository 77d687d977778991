//! The symmetric JSON-RPC peer runtime (spec.md §4.4-§4.6): outbound
//! correlation, the notification/progress bus, per-request context, and the
//! `Peer<T>` dispatch engine that ties them to a concrete [`mcprs_transport::Transport`].

pub mod context;
pub mod correlation;
pub mod notify;
pub mod peer;

pub use context::{CloseStreamHook, OutboundCall, PeerUpcalls, RequestContext};
pub use correlation::{CallError, CorrelationTable, PendingResult};
pub use notify::{NotificationBus, ProgressEvent, ProgressToken};
pub use peer::{Peer, PeerConfig, PeerRole};
