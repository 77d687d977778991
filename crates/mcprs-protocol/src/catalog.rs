//! Example domain-method instantiations of [`crate::method::Method`].
//!
//! spec.md §1 explicitly places the concrete domain methods out of scope —
//! the engine is generic over `Method`. These are trimmed down from
//! `turbomcp-protocol/src/types/{sampling,elicitation,roots,logging,ping}.rs`
//! to the shapes a host needs to exercise the engine end to end (and that
//! the notification bus in `mcprs-engine::notify` dispatches by name); a
//! real server defines its own tool/resource/prompt catalog on top.

use crate::method::{Empty, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `ping` — server and client both expose a typed convenience for this.
pub struct Ping;
impl Method for Ping {
    const NAME: &'static str = "ping";
    type Params = PingParams;
    type Result = PingResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PingResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// `roots/list` — server-to-client request, gated on `ClientCapabilities::roots`.
pub struct RootsList;
impl Method for RootsList {
    const NAME: &'static str = "roots/list";
    type Params = Empty;
    type Result = ListRootsResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}

/// `sampling/createMessage` — server-to-client request, gated on
/// `ClientCapabilities::sampling`.
pub struct SamplingCreateMessage;
impl Method for SamplingCreateMessage {
    const NAME: &'static str = "sampling/createMessage";
    type Params = CreateMessageParams;
    type Result = CreateMessageResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingMessage {
    pub role: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateMessageResult {
    pub role: String,
    pub content: serde_json::Value,
    pub model: String,
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// `elicitation/create` — server-to-client request, gated on
/// `ClientCapabilities::elicitation`.
pub struct ElicitationCreate;
impl Method for ElicitationCreate {
    const NAME: &'static str = "elicitation/create";
    type Params = ElicitParams;
    type Result = ElicitResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitParams {
    pub message: String,
    #[serde(rename = "requestedSchema", skip_serializing_if = "Option::is_none")]
    pub requested_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitResult {
    pub action: ElicitAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<HashMap<String, serde_json::Value>>,
}

/// `logging/setLevel` — client-to-server request, gated on
/// `ServerCapabilities::logging`.
pub struct LoggingSetLevel;
impl Method for LoggingSetLevel {
    const NAME: &'static str = "logging/setLevel";
    type Params = SetLevelParams;
    type Result = Empty;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLevelParams {
    pub level: LogLevel,
}

/// `completion/complete` — client-to-server request, gated on
/// `ServerCapabilities::completions`.
pub struct CompletionComplete;
impl Method for CompletionComplete {
    const NAME: &'static str = "completion/complete";
    type Params = CompleteParams;
    type Result = CompleteResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteParams {
    #[serde(rename = "ref")]
    pub reference: serde_json::Value,
    pub argument: CompleteArgument,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteArgument {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompleteResult {
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(rename = "hasMore", skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Zero-payload notifications dispatched through the notification bus
/// (spec.md §4.9): `notifications/roots/list_changed` and
/// `notifications/prompts/list_changed` (SPEC_FULL.md supplemented feature 1).
pub mod notifications {
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PROGRESS: &str = "notifications/progress";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const MESSAGE: &str = "notifications/message";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_params_omit_absent_data() {
        let json = serde_json::to_value(PingParams::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn log_level_orders_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Emergency);
    }

    #[test]
    fn elicit_result_omits_content_on_decline() {
        let result = ElicitResult { action: ElicitAction::Decline, content: None };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"action": "decline"}));
    }
}
