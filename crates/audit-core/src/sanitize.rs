//! Payload normalization and redaction of sensitive fields.

use crate::config::LedgerConfig;
use crate::types::Payload;
use serde::Serialize;
use serde_json::Value;

pub const SERIALIZATION_ERROR_KEY: &str = "_serialization_error";

/// Convert any serializable payload into a JSON object.
///
/// Non-object values are wrapped as `{"value": ...}` and `null` becomes an
/// empty object. When the payload cannot be represented as JSON the result is
/// a fallback object describing the failure, and the reason is returned
/// alongside so the caller can surface it.
pub fn normalize_payload<P: Serialize + ?Sized>(payload: &P) -> (Payload, Option<String>) {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => (map, None),
        Ok(Value::Null) => (Payload::new(), None),
        Ok(other) => {
            let mut map = Payload::new();
            map.insert("value".into(), other);
            (map, None)
        }
        Err(err) => {
            let reason = err.to_string();
            let mut map = Payload::new();
            map.insert(SERIALIZATION_ERROR_KEY.into(), Value::String(reason.clone()));
            (map, Some(reason))
        }
    }
}

/// Redacts values whose keys contain a deny-listed fragment.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    fragments: Vec<String>,
    marker: String,
}

impl Sanitizer {
    pub fn new<I, S>(fragments: I, marker: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fragments: fragments
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            marker: marker.into(),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(&config.sensitive_key_fragments, config.redaction_marker.clone())
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fragments.iter().any(|f| key.contains(f.as_str()))
    }

    pub fn sanitize(&self, payload: Payload) -> Payload {
        payload
            .into_iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(&key) {
                    Value::String(self.marker.clone())
                } else {
                    self.sanitize_value(value)
                };
                (key, value)
            })
            .collect()
    }

    fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize(map)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.sanitize_value(v)).collect())
            }
            other => other,
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}
