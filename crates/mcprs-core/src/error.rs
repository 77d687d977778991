//! The closed `MCPError` taxonomy (spec.md §3, §7).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Standard JSON-RPC 2.0 error codes, plus the MCP-specific extensions.
///
/// This is a *closed* taxonomy: unlike the teacher's `ErrorKind`, it does not
/// grow a variant per domain method (tools/resources/prompts/...) because the
/// core is generic over `Method` and never inspects domain semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ConnectionClosed,
    TransportError,
    UrlElicitationRequired,
    /// An application-defined code outside the reserved JSON-RPC range.
    Application(i32),
}

impl ErrorCode {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            // Negative range reserved by this runtime, outside JSON-RPC's
            // -32768..-32000 reserved band so application codes never collide.
            Self::ConnectionClosed => -31000,
            Self::TransportError => -31001,
            Self::UrlElicitationRequired => -31002,
            Self::Application(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -31000 => Self::ConnectionClosed,
            -31001 => Self::TransportError,
            -31002 => Self::UrlElicitationRequired,
            other => Self::Application(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An elicitation the peer may resolve via URL, carried by
/// [`McpError::UrlElicitationRequired`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlElicitation {
    pub elicitation_id: String,
    pub url: String,
    pub message: String,
}

/// The closed error taxonomy (spec.md §3 "MCPError").
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum McpError {
    #[error("parse error: {message}")]
    ParseError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[error("method not found: {message}")]
    MethodNotFound {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[error("invalid params: {message}")]
    InvalidParams {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[error("internal error: {message}")]
    InternalError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("transport error: {message}")]
    TransportError { message: String },
    #[error("url elicitation required: {message}")]
    UrlElicitationRequired {
        message: String,
        elicitations: Vec<UrlElicitation>,
    },
    /// An application-defined error outside the reserved taxonomy, carried
    /// through so that domain-method adapters (out of this core's scope) can
    /// surface their own codes without the core needing to know about them.
    #[error("application error {code}: {message}")]
    Application {
        code: i32,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl McpError {
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: impl fmt::Display) -> Self {
        Self::MethodNotFound {
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, new_data: Value) -> Self {
        match &mut self {
            Self::ParseError { data, .. }
            | Self::InvalidRequest { data, .. }
            | Self::MethodNotFound { data, .. }
            | Self::InvalidParams { data, .. }
            | Self::InternalError { data, .. }
            | Self::Application { data, .. } => *data = Some(new_data),
            Self::ConnectionClosed | Self::TransportError { .. } | Self::UrlElicitationRequired { .. } => {}
        }
        self
    }

    /// The JSON-RPC error code for this variant.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => ErrorCode::ParseError.code(),
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest.code(),
            Self::MethodNotFound { .. } => ErrorCode::MethodNotFound.code(),
            Self::InvalidParams { .. } => ErrorCode::InvalidParams.code(),
            Self::InternalError { .. } => ErrorCode::InternalError.code(),
            Self::ConnectionClosed => ErrorCode::ConnectionClosed.code(),
            Self::TransportError { .. } => ErrorCode::TransportError.code(),
            Self::UrlElicitationRequired { .. } => ErrorCode::UrlElicitationRequired.code(),
            Self::Application { code, .. } => *code,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ParseError { message, .. }
            | Self::InvalidRequest { message, .. }
            | Self::MethodNotFound { message, .. }
            | Self::InvalidParams { message, .. }
            | Self::InternalError { message, .. }
            | Self::TransportError { message }
            | Self::UrlElicitationRequired { message, .. }
            | Self::Application { message, .. } => message,
            Self::ConnectionClosed => "connection closed",
        }
    }

    /// Render as a JSON-RPC error object `{code, message, data?}`.
    #[must_use]
    pub fn to_json_rpc_error(&self) -> JsonRpcErrorObject {
        let data = match self {
            Self::ParseError { data, .. }
            | Self::InvalidRequest { data, .. }
            | Self::MethodNotFound { data, .. }
            | Self::InvalidParams { data, .. }
            | Self::InternalError { data, .. }
            | Self::Application { data, .. } => data.clone(),
            Self::UrlElicitationRequired { elicitations, .. } => {
                Some(serde_json::json!({ "elicitations": elicitations }))
            }
            Self::ConnectionClosed | Self::TransportError { .. } => None,
        };
        JsonRpcErrorObject {
            code: self.code(),
            message: self.message().to_string(),
            data,
        }
    }
}

/// The error object as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcErrorObject> for McpError {
    fn from(obj: JsonRpcErrorObject) -> Self {
        match ErrorCode::from_code(obj.code) {
            ErrorCode::ParseError => Self::ParseError {
                message: obj.message,
                data: obj.data,
            },
            ErrorCode::InvalidRequest => Self::InvalidRequest {
                message: obj.message,
                data: obj.data,
            },
            ErrorCode::MethodNotFound => Self::MethodNotFound {
                message: obj.message,
                data: obj.data,
            },
            ErrorCode::InvalidParams => Self::InvalidParams {
                message: obj.message,
                data: obj.data,
            },
            ErrorCode::InternalError => Self::InternalError {
                message: obj.message,
                data: obj.data,
            },
            ErrorCode::ConnectionClosed => Self::ConnectionClosed,
            ErrorCode::TransportError => Self::TransportError {
                message: obj.message,
            },
            ErrorCode::UrlElicitationRequired => {
                let elicitations = obj
                    .data
                    .as_ref()
                    .and_then(|d| d.get("elicitations"))
                    .and_then(|e| serde_json::from_value(e.clone()).ok())
                    .unwrap_or_default();
                Self::UrlElicitationRequired {
                    message: obj.message,
                    elicitations,
                }
            }
            ErrorCode::Application(code) => Self::Application {
                code,
                message: obj.message,
                data: obj.data,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn code_round_trips_through_error_object() {
        let err = McpError::method_not_found("tools/list");
        let obj = err.to_json_rpc_error();
        assert_eq!(obj.code, -32601);
        let back: McpError = obj.into();
        assert_eq!(back, err);
    }

    #[test]
    fn url_elicitation_carries_structured_data() {
        let err = McpError::UrlElicitationRequired {
            message: "sign in required".into(),
            elicitations: vec![UrlElicitation {
                elicitation_id: "e1".into(),
                url: "https://example.com/auth".into(),
                message: "Sign in".into(),
            }],
        };
        let obj = err.to_json_rpc_error();
        let back: McpError = obj.into();
        assert_eq!(back, err);
    }

    #[test]
    fn unknown_application_code_round_trips() {
        let err = McpError::Application {
            code: -32001,
            message: "tool not found".into(),
            data: None,
        };
        let obj = err.to_json_rpc_error();
        assert_eq!(obj.code, -32001);
        let back: McpError = obj.into();
        assert_eq!(back, err);
    }
}
