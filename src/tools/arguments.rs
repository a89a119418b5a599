//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::{FlowError, Result};

/// Wrapper around tool call arguments providing typed extraction.
///
/// Backends stream arguments as a JSON string; both the decoded object and
/// the raw string form are accepted.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Build from the raw argument text a backend streamed.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(Self::new(normalize(&Value::String(raw.to_string()))?))
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// The arguments as a JSON object, decoding a string payload first.
    pub fn normalized(&self) -> Result<Value> {
        normalize(&self.value)
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| FlowError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| FlowError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.normalized()?).map_err(|e| {
            FlowError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

fn normalize(value: &Value) -> Result<Value> {
    match value {
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(serde_json::json!({}))
            } else {
                serde_json::from_str::<Value>(trimmed).map_err(|e| {
                    FlowError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
                })
            }
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        account: String,
    }

    #[test]
    fn deserializes_string_encoded_arguments() {
        let args = ToolArguments::new(json!(r#" {"account": "13800000000"} "#));
        let parsed: Account = args.deserialize().unwrap();
        assert_eq!(parsed.account, "13800000000");
    }

    #[test]
    fn empty_string_arguments_become_empty_object() {
        let args = ToolArguments::from_json_str("   ").unwrap();
        assert_eq!(args.raw(), &json!({}));
    }

    #[test]
    fn missing_key_is_invalid_argument() {
        let args = ToolArguments::new(json!({"other": 1}));
        let err = args.get_str("account").unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
    }
}
