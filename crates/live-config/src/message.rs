//! Wire types shared by the store channels and the mirror.

use crate::error::LiveConfigResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local view of the configuration: string keys to arbitrary JSON values.
pub type ConfigMap = serde_json::Map<String, Value>;

/// A persisted field as read back from (or written to) the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

impl ConfigEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Change notification published on the broadcast topic.
///
/// Encoded as a JSON object `{"key": ..., "value": ...}`. The value keeps
/// whatever JSON type the publisher serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl BroadcastMessage {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Encode for publishing.
    pub fn to_json(&self) -> LiveConfigResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an inbound payload.
    ///
    /// Returns `None` for anything that is not a JSON object with a
    /// non-empty string `key`. Foreign producers share the topic, so a bad
    /// payload is not an error.
    pub fn parse(raw: &str) -> Option<Self> {
        let message: BroadcastMessage = serde_json::from_str(raw).ok()?;
        if message.key.is_empty() {
            return None;
        }
        Some(message)
    }
}

/// Text form a value takes once persisted in the hash.
///
/// The store only holds strings: string values are kept verbatim and any
/// other value is stored as its compact JSON text.
pub fn persisted_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_encoding() {
        let msg = BroadcastMessage::new("host", json!("http://some-host"));
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"key":"host","value":"http://some-host"}"#
        );
    }

    #[test]
    fn test_parse_keeps_value_type() {
        let msg = BroadcastMessage::parse(r#"{"key":"db-connect-attempt","value":2}"#).unwrap();
        assert_eq!(msg.key, "db-connect-attempt");
        assert_eq!(msg.value, json!(2));

        let msg = BroadcastMessage::parse(r#"{"key":"db","value":{"port":8998}}"#).unwrap();
        assert_eq!(msg.value, json!({"port": 8998}));
    }

    #[test]
    fn test_parse_missing_value_is_null() {
        let msg = BroadcastMessage::parse(r#"{"key":"flag"}"#).unwrap();
        assert_eq!(msg.value, Value::Null);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(BroadcastMessage::parse("not json").is_none());
        assert!(BroadcastMessage::parse("[1,2,3]").is_none());
        assert!(BroadcastMessage::parse(r#"{"value":"orphan"}"#).is_none());
        assert!(BroadcastMessage::parse(r#"{"key":"","value":"x"}"#).is_none());
        assert!(BroadcastMessage::parse(r#"{"key":7,"value":"x"}"#).is_none());
    }

    #[test]
    fn test_persisted_text() {
        assert_eq!(persisted_text(&json!("plain")), "plain");
        assert_eq!(persisted_text(&json!(0)), "0");
        assert_eq!(persisted_text(&json!(true)), "true");
        assert_eq!(persisted_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
