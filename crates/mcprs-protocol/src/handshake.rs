//! The `initialize` handshake (spec.md §4.5, C5), grounded on
//! `turbomcp-protocol/src/types/initialization.rs` and `types/core.rs`'s
//! `Implementation`/`ProtocolVersion` types.

use crate::capabilities::{ClientCapabilities, GatedMethod, ServerCapabilities};
use mcprs_core::McpError;
use serde::{Deserialize, Serialize};

/// A protocol version identifier, e.g. `"2025-06-18"`. Opaque to us beyond
/// lexical/set comparison — we never interpret it as a date.
pub type ProtocolVersion = String;

/// Descriptive implementation metadata exchanged during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub version: String,
}

impl Implementation {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), title: None, version: version.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeRequest {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Zero-field `notifications/initialized` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InitializedNotification;

/// Picks the highest version present in both lists, per spec.md §4.5's
/// "highest mutually supported" rule. Lists are not assumed sorted; the
/// server's declared list defines priority order when multiple entries
/// overlap with equal rank, so we walk the server's list front-to-back
/// and return the first one the client also declared.
#[must_use]
pub fn negotiate_version(
    server_supported: &[ProtocolVersion],
    client_supported: &[ProtocolVersion],
) -> Option<ProtocolVersion> {
    server_supported
        .iter()
        .find(|v| client_supported.contains(v))
        .cloned()
}

/// Errors if no mutually supported version exists, as spec.md §4.5 requires.
pub fn negotiate_version_or_fail(
    server_supported: &[ProtocolVersion],
    client_supported: &[ProtocolVersion],
) -> Result<ProtocolVersion, McpError> {
    negotiate_version(server_supported, client_supported).ok_or_else(|| {
        McpError::invalid_request(format!(
            "no protocol version overlap: server supports {server_supported:?}, client sent {client_supported:?}"
        ))
    })
}

/// The three phases a side's view of the handshake passes through, tracked
/// independently by each peer (spec.md §4.5's "initialized barrier" and the
/// Session state machine in §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No `initialize` request has been sent/received yet.
    Uninitialized,
    /// `initialize` exchanged; `notifications/initialized` not yet seen.
    /// Non-initialize requests are already accepted in this state (the
    /// barrier only blocks requests arriving *before* `initialize`).
    Initializing,
    /// Fully initialized — `notifications/initialized` observed.
    Initialized,
}

/// Strict/lenient capability gating, per side (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatingMode {
    /// Capability-dependent calls fail locally with `methodNotFound` when
    /// the peer never advertised the matching capability.
    Strict,
    /// Capability-dependent calls are attempted regardless; the remote may
    /// still reject them.
    Lenient,
}

/// Evaluates strict-mode capability gating against a negotiated peer.
/// Returns `Ok(())` when the call may proceed (either lenient mode, or the
/// remote capability is present), `Err` otherwise.
pub fn check_gate(
    mode: GatingMode,
    method: &str,
    remote_client_caps: Option<&ClientCapabilities>,
    remote_server_caps: Option<&ServerCapabilities>,
) -> Result<(), McpError> {
    if mode == GatingMode::Lenient {
        return Ok(());
    }
    let Some(gated) = GatedMethod::from_method_name(method) else {
        return Ok(());
    };
    let satisfied = match gated {
        GatedMethod::RootsList | GatedMethod::SamplingCreateMessage => {
            remote_client_caps.is_some_and(|c| c.satisfies(gated))
        }
        _ => remote_server_caps.is_some_and(|c| c.satisfies(gated)),
    };
    if satisfied {
        Ok(())
    } else {
        Err(McpError::method_not_found(format!(
            "{method}: peer did not advertise the required capability"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_highest_mutual_version_in_server_priority_order() {
        let server = vec!["2025-06-18".to_string(), "2024-11-05".to_string()];
        let client = vec!["2024-11-05".to_string(), "2025-06-18".to_string()];
        assert_eq!(negotiate_version(&server, &client), Some("2025-06-18".to_string()));
    }

    #[test]
    fn no_overlap_fails_with_invalid_request() {
        let server = vec!["2025-06-18".to_string()];
        let client = vec!["2023-01-01".to_string()];
        let err = negotiate_version_or_fail(&server, &client).unwrap_err();
        assert!(matches!(err, McpError::InvalidRequest { .. }));
    }

    #[test]
    fn strict_mode_blocks_ungated_capability() {
        let caps = ServerCapabilities::default();
        let err = check_gate(GatingMode::Strict, "prompts/list", None, Some(&caps)).unwrap_err();
        assert!(matches!(err, McpError::MethodNotFound { .. }));
    }

    #[test]
    fn lenient_mode_never_blocks() {
        let caps = ServerCapabilities::default();
        assert!(check_gate(GatingMode::Lenient, "prompts/list", None, Some(&caps)).is_ok());
    }

    #[test]
    fn unrelated_methods_are_never_gated() {
        assert!(check_gate(GatingMode::Strict, "ping", None, None).is_ok());
    }
}
