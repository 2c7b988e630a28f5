use serde_json::Value as JsonValue;

/// Structured key-value payload used for parameters, credentials and step data
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Convenience accessors over [`JsonObject`] parameters
pub trait JsonObjectExt {
    fn get_str(&self, key: &str) -> Option<&str>;

    fn get_u64(&self, key: &str) -> Option<u64>;

    fn get_bool(&self, key: &str) -> Option<bool>;

    fn get_object(&self, key: &str) -> Option<&JsonObject>;
}

impl JsonObjectExt for JsonObject {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Accepts numbers and numeric strings, since templated parameters
    /// always render to strings
    fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_object(&self, key: &str) -> Option<&JsonObject> {
        self.get(key).and_then(|v| v.as_object())
    }
}

/// Build a [`JsonObject`] from a `serde_json::json!` object literal.
/// Non-object values produce an empty map.
pub fn json_object(value: JsonValue) -> JsonObject {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonObject::new(),
    }
}
