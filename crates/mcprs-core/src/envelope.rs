//! The JSON-RPC 2.0 envelope: `RequestId`, `Request`/`Notification`/
//! `Response`, and the batch-detecting `Frame` sum type (spec.md §3, §4.1).

use crate::error::{JsonRpcErrorObject, McpError};
use crate::meta::{GeneralFields, Meta};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

/// Marker type that serializes as the literal `"2.0"` and rejects anything
/// else on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(DeError::custom(format!(
                "invalid jsonrpc version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: integer or string (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// A single JSON-RPC request (expects a response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(flatten)]
    pub fields: EnvelopeFields,
}

/// A single JSON-RPC notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(flatten)]
    pub fields: EnvelopeFields,
}

/// A single JSON-RPC response: either a result or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: JsonRpcVersion,
    /// `None` only for a parse-error response with no recoverable id.
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    #[serde(flatten)]
    pub fields: EnvelopeFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Success { result: Value },
    Error { error: JsonRpcErrorObject },
}

/// `_meta` plus arbitrary passthrough extras, flattened onto every envelope
/// variant. `#[serde(flatten)]` buckets unrecognized top-level keys into
/// `extra` automatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeFields {
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl EnvelopeFields {
    #[must_use]
    pub fn to_general_fields(&self) -> GeneralFields {
        GeneralFields {
            meta: self
                .meta
                .as_ref()
                .map(|m| Meta::from_map(m.clone().into_iter().collect())),
            extra: self.extra.clone().into_iter().collect(),
        }
    }
}

impl Request {
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
            fields: EnvelopeFields::default(),
        }
    }
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            fields: EnvelopeFields::default(),
        }
    }
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id),
            payload: ResponsePayload::Success { result },
            fields: EnvelopeFields::default(),
        }
    }

    #[must_use]
    pub fn error(id: Option<RequestId>, error: &McpError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            payload: ResponsePayload::Error {
                error: error.to_json_rpc_error(),
            },
            fields: EnvelopeFields::default(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.payload, ResponsePayload::Success { .. })
    }

    #[must_use]
    pub fn into_result(self) -> Result<Value, McpError> {
        match self.payload {
            ResponsePayload::Success { result } => Ok(result),
            ResponsePayload::Error { error } => Err(error.into()),
        }
    }
}

/// One decoded frame: a single envelope, or a batch thereof (spec.md §3).
#[derive(Debug, Clone)]
pub enum Frame {
    Request(Box<Request>),
    Notification(Box<Notification>),
    Response(Box<Response>),
    Batch(Batch),
}

/// A non-empty, mixed collection of frames submitted in a single write.
/// Spec.md §3: "An empty batch is an error; a batch of only responses is
/// permitted inbound."
#[derive(Debug, Clone)]
pub struct Batch(pub Vec<SingleFrame>);

/// The frame shapes that may legally appear inside a batch (a batch cannot
/// itself nest a batch).
#[derive(Debug, Clone)]
pub enum SingleFrame {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Frame {
    /// Decode a single JSON value into a `Frame`, detecting batches and
    /// rejecting envelopes that are ambiguous (both `method` and `result`/
    /// `error` present) per spec.md §4.1.
    pub fn decode(value: Value) -> Result<Self, McpError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(McpError::invalid_request("empty batch"));
                }
                let frames = items
                    .into_iter()
                    .map(decode_single)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Frame::Batch(Batch(frames)))
            }
            single => match decode_single(single)? {
                SingleFrame::Request(r) => Ok(Frame::Request(Box::new(r))),
                SingleFrame::Notification(n) => Ok(Frame::Notification(Box::new(n))),
                SingleFrame::Response(resp) => Ok(Frame::Response(Box::new(resp))),
            },
        }
    }

    /// Encode back to a JSON value. A `Batch` of one element still encodes
    /// as an array — batching is a property of how the frame was
    /// constructed, not its length, matching spec.md §4.1's "encoders emit a
    /// batch iff the peer submitted multiple frames in a single write."
    pub fn encode(&self) -> Result<Value, McpError> {
        match self {
            Frame::Request(r) => {
                r.fields.to_general_fields().validate()?;
                serde_json::to_value(r.as_ref()).map_err(|e| McpError::internal_error(e.to_string()))
            }
            Frame::Notification(n) => {
                n.fields.to_general_fields().validate()?;
                serde_json::to_value(n.as_ref()).map_err(|e| McpError::internal_error(e.to_string()))
            }
            Frame::Response(resp) => {
                resp.fields.to_general_fields().validate()?;
                serde_json::to_value(resp.as_ref())
                    .map_err(|e| McpError::internal_error(e.to_string()))
            }
            Frame::Batch(batch) => {
                let items = batch
                    .0
                    .iter()
                    .map(encode_single)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(items))
            }
        }
    }
}

fn encode_single(frame: &SingleFrame) -> Result<Value, McpError> {
    match frame {
        SingleFrame::Request(r) => {
            r.fields.to_general_fields().validate()?;
            serde_json::to_value(r).map_err(|e| McpError::internal_error(e.to_string()))
        }
        SingleFrame::Notification(n) => {
            n.fields.to_general_fields().validate()?;
            serde_json::to_value(n).map_err(|e| McpError::internal_error(e.to_string()))
        }
        SingleFrame::Response(resp) => {
            resp.fields.to_general_fields().validate()?;
            serde_json::to_value(resp).map_err(|e| McpError::internal_error(e.to_string()))
        }
    }
}

fn decode_single(value: Value) -> Result<SingleFrame, McpError> {
    let Value::Object(obj) = value else {
        return Err(McpError::invalid_request("frame must be a JSON object"));
    };

    let has_method = obj.contains_key("method");
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_method && has_result_or_error {
        return Err(McpError::invalid_request(
            "envelope cannot carry both `method` and `result`/`error`",
        ));
    }

    let value = Value::Object(obj);
    if has_method {
        if value.get("id").is_some() {
            let req: Request =
                serde_json::from_value(value).map_err(|e| McpError::invalid_request(e.to_string()))?;
            Ok(SingleFrame::Request(req))
        } else {
            let note: Notification = serde_json::from_value(value)
                .map_err(|e| McpError::invalid_request(e.to_string()))?;
            Ok(SingleFrame::Notification(note))
        }
    } else if has_result_or_error {
        let resp: Response =
            serde_json::from_value(value).map_err(|e| McpError::invalid_request(e.to_string()))?;
        Ok(SingleFrame::Response(resp))
    } else {
        Err(McpError::invalid_request(
            "envelope is neither a request, notification, nor response",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn round_trips_request_with_meta_and_extra() {
        let mut req = Request::new(1i64, "ping", None);
        req.fields.meta = Some(serde_json::Map::from_iter([(
            "progressToken".to_string(),
            json!("tok-1"),
        )]));
        req.fields.extra.insert("vendorField".into(), json!(42));

        let frame = Frame::Request(Box::new(req));
        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(encoded.clone()).unwrap();
        let Frame::Request(decoded_req) = decoded else {
            panic!("expected request");
        };
        assert_eq!(decoded_req.fields.extra.get("vendorField"), Some(&json!(42)));
        let re_encoded = Frame::Request(Box::new(decoded_req)).encode().unwrap();
        assert_eq!(re_encoded, encoded);
    }

    #[test]
    fn rejects_both_method_and_result() {
        let bad = json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "result": {}});
        assert!(Frame::decode(bad).is_err());
    }

    #[test]
    fn rejects_empty_batch() {
        let bad = json!([]);
        assert!(Frame::decode(bad).is_err());
    }

    #[test]
    fn accepts_batch_of_only_responses() {
        let ok = json!([
            {"jsonrpc": "2.0", "id": 1, "result": {}},
            {"jsonrpc": "2.0", "id": 2, "result": {}}
        ]);
        let frame = Frame::decode(ok).unwrap();
        assert!(matches!(frame, Frame::Batch(_)));
    }

    #[test]
    fn absent_null_and_empty_object_params_are_equivalent() {
        let absent = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        let null = json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": null});
        let empty = json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": {}});
        for value in [absent, null, empty] {
            let Frame::Request(req) = Frame::decode(value).unwrap() else {
                panic!("expected request");
            };
            let is_empty = match req.params {
                None => true,
                Some(Value::Null) => true,
                Some(Value::Object(ref m)) => m.is_empty(),
                _ => false,
            };
            assert!(is_empty);
        }
    }
}
