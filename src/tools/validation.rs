//! Check tool and decision arguments against their JSON Schema before use.

use serde_json::Value;

/// Validate arguments against a JSON Schema.
///
/// Top-level checks only: object shape, required fields, property types
/// (including `["boolean", "null"]` style unions) and string enums. Returns
/// the first violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("expected object arguments, got {}", json_type_name(args)));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if let Some(expected) = prop.get("type") {
            if !type_matches(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{}', got {}",
                    type_label(expected),
                    json_type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !value.is_null() && !allowed.contains(value) {
                let allowed = Value::Array(allowed.clone());
                return Err(format!("field '{key}' must be one of {allowed}"));
            }
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(name) => value_matches_type(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| value_matches_type(value, name)),
        _ => true,
    }
}

fn type_label(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        other => other.to_string(),
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
