//! `_meta` and general (passthrough) fields (spec.md §3, §4.1).

use crate::error::McpError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved top-level envelope keys that must never surface as extras.
const RESERVED_KEYS: &[&str] = &["jsonrpc", "id", "method", "params", "result", "error"];

/// Standard `_meta` subfield carrying a progress correlation token.
pub const PROGRESS_TOKEN_KEY: &str = "progressToken";

/// The `_meta` map: namespaced string keys to arbitrary JSON values.
///
/// Keys must match `^[A-Za-z0-9._-]+(/[A-Za-z0-9._-]+)*$` (spec.md §4.1).
/// Validation happens at encode time via [`Meta::validate`], not at
/// construction, so callers can build up a map incrementally before
/// serializing it onto the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta(BTreeMap<String, Value>);

impl Meta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn progress_token(&self) -> Option<&Value> {
        self.get(PROGRESS_TOKEN_KEY)
    }

    pub fn set_progress_token(&mut self, token: Value) {
        self.insert(PROGRESS_TOKEN_KEY, token);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate every key against spec.md §4.1's grammar. Called by the
    /// wire codec before serialization; a violation fails the encode with a
    /// typed error rather than emitting a malformed envelope.
    pub fn validate(&self) -> Result<(), McpError> {
        for key in self.0.keys() {
            if !is_valid_meta_key(key) {
                return Err(McpError::invalid_request(format!(
                    "invalid _meta key: {key}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    #[must_use]
    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

fn is_valid_meta_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    key.split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    })
}

/// Passthrough top-level fields present on an envelope but not part of the
/// JSON-RPC 2.0 shape or `_meta`. Preserved verbatim across decode/encode so
/// the identity law in spec.md §8 holds for unknown extras too.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralFields {
    pub meta: Option<Meta>,
    pub extra: BTreeMap<String, Value>,
}

impl GeneralFields {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.as_ref().is_none_or(Meta::is_empty) && self.extra.is_empty()
    }

    /// Reject any extra field that collides with a reserved envelope key.
    pub fn validate(&self) -> Result<(), McpError> {
        if let Some(meta) = &self.meta {
            meta.validate()?;
        }
        for key in self.extra.keys() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(McpError::invalid_request(format!(
                    "reserved key cannot be an extra field: {key}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_namespaced_key() {
        assert!(is_valid_meta_key("vendor.example/field"));
        assert!(is_valid_meta_key("progressToken"));
        assert!(!is_valid_meta_key(""));
        assert!(!is_valid_meta_key("vendor example/field"));
        assert!(!is_valid_meta_key("vendor//field"));
    }

    #[test]
    fn reserved_extra_field_rejected() {
        let mut fields = GeneralFields::default();
        fields.extra.insert("method".into(), Value::Null);
        assert!(fields.validate().is_err());
    }

    #[test]
    fn meta_validate_rejects_bad_key() {
        let mut meta = Meta::new();
        meta.insert("bad key", Value::Bool(true));
        assert!(meta.validate().is_err());
    }
}
