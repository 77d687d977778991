//! The generic `Method` trait the core is written against (spec.md §1: "the
//! core is generic over `Method { name, Params, Result }`"). The concrete
//! domain methods in [`crate::catalog`] are example instantiations, not part
//! of the required surface — a host crate may define its own.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed JSON-RPC method: its wire name plus the Rust types its params and
/// result serialize to/from. Implemented as a unit struct per method, e.g.
/// `struct ToolsList;` with `impl Method for ToolsList`, so the engine can
/// offer a typed `call::<ToolsList>(params)` without per-method boilerplate
/// in the dispatch path.
pub trait Method {
    /// The JSON-RPC method name on the wire, e.g. `"tools/list"`.
    const NAME: &'static str;
    /// Request parameters. Use `()` for parameterless methods.
    type Params: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Successful result payload.
    type Result: Serialize + DeserializeOwned + Send + Sync + 'static;
}

/// A method with no meaningful params (serializes as an absent/`{}` params
/// field), used by several MCP notifications and `ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Empty;
