//! Capability negotiation types exchanged during the handshake (spec.md
//! §4.5), grounded on `turbomcp-protocol/src/types/capabilities.rs`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the Client side advertises during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapabilities>,
}

/// What the Server side advertises in its `InitializeResult`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SamplingCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ElicitationCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CompletionCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LoggingCapabilities;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RootsCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PromptsCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourcesCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ToolsCapabilities {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// The capability-gated methods named in spec.md §4.5, used by
/// [`crate::handshake::Gate`] to look up whether a remote advertised the
/// matching capability before a strict-mode caller is allowed to invoke it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatedMethod {
    CompletionComplete,
    ElicitationCreate,
    RootsList,
    SamplingCreateMessage,
    LoggingSetLevel,
    PromptsGet,
    PromptsList,
}

impl GatedMethod {
    #[must_use]
    pub fn from_method_name(name: &str) -> Option<Self> {
        match name {
            "completion/complete" => Some(Self::CompletionComplete),
            "elicitation/create" => Some(Self::ElicitationCreate),
            "roots/list" => Some(Self::RootsList),
            "sampling/createMessage" => Some(Self::SamplingCreateMessage),
            "logging/setLevel" => Some(Self::LoggingSetLevel),
            "prompts/get" => Some(Self::PromptsGet),
            "prompts/list" => Some(Self::PromptsList),
            _ => None,
        }
    }
}

impl ClientCapabilities {
    /// Whether this side advertised the capability a `GatedMethod` requires
    /// of a *client* peer (`roots/list`, `sampling/createMessage`).
    #[must_use]
    pub fn satisfies(&self, method: GatedMethod) -> bool {
        match method {
            GatedMethod::RootsList => self.roots.is_some(),
            GatedMethod::SamplingCreateMessage => self.sampling.is_some(),
            GatedMethod::ElicitationCreate => self.elicitation.is_some(),
            _ => true,
        }
    }
}

impl ServerCapabilities {
    /// Whether this side advertised the capability a `GatedMethod` requires
    /// of a *server* peer (`prompts/*`, `completion/complete`, `logging/setLevel`).
    #[must_use]
    pub fn satisfies(&self, method: GatedMethod) -> bool {
        match method {
            GatedMethod::CompletionComplete => self.completions.is_some(),
            GatedMethod::LoggingSetLevel => self.logging.is_some(),
            GatedMethod::PromptsGet | GatedMethod::PromptsList => self.prompts.is_some(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_capabilities_round_trip_omits_absent_fields() {
        let caps = ClientCapabilities {
            roots: Some(RootsCapabilities { list_changed: Some(true) }),
            ..Default::default()
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json, serde_json::json!({"roots": {"listChanged": true}}));
    }

    #[test]
    fn gating_checks_the_right_side() {
        let empty = ServerCapabilities::default();
        assert!(!empty.satisfies(GatedMethod::PromptsList));
        let with_prompts = ServerCapabilities {
            prompts: Some(PromptsCapabilities::default()),
            ..Default::default()
        };
        assert!(with_prompts.satisfies(GatedMethod::PromptsList));
    }
}
