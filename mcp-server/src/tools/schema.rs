//! Minimal JSON-schema subset used for tool input validation.
//!
//! Supported keywords: `type`, `properties`, `required`, `enum`, `minimum`,
//! `maximum`, `items`, `minLength`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `args` against `schema`, returning the first violation found.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    check(schema, args, "arguments")
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{} must be of type {}, got {}",
                path,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(display).collect();
            return Err(format!("{} must be one of: {}", path, options.join(", ")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{} must be >= {}", path, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{} must be <= {}", path, max));
            }
        }
    }

    if let (Some(s), Some(min)) = (
        value.as_str(),
        schema.get("minLength").and_then(Value::as_u64),
    ) {
        if (s.trim().chars().count() as u64) < min {
            return Err(format!("{} must be at least {} characters", path, min));
        }
    }

    if let Some(obj) = value.as_object() {
        check_object(schema, obj, path)?;
    }

    if let (Some(items), Some(schema_items)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check(schema_items, item, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

fn check_object(schema: &Map<String, Value>, obj: &Map<String, Value>, path: &str) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if obj.get(key).map_or(true, Value::is_null) {
                return Err(format!("missing required field '{}'", key));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in props {
            match obj.get(key) {
                Some(Value::Null) | None => {}
                Some(v) => check(prop_schema, v, &format!("{}.{}", path, key))?,
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string", "minLength": 1},
                "period": {"type": "string", "enum": ["1mo", "6mo"]},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "indicators": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["symbol"]
        })
    }

    #[test]
    fn test_accepts_valid_arguments() {
        let args = json!({"symbol": "AAPL", "period": "6mo", "limit": 5, "indicators": ["rsi"]});
        assert!(validate(&schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&schema(), &json!({"period": "6mo"})).unwrap_err();
        assert!(err.contains("symbol"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        assert!(validate(&schema(), &json!({"symbol": null})).is_err());
    }

    #[test]
    fn test_type_enum_and_range() {
        assert!(validate(&schema(), &json!({"symbol": 42})).unwrap_err().contains("string"));
        assert!(validate(&schema(), &json!({"symbol": "A", "period": "2w"}))
            .unwrap_err()
            .contains("one of"));
        assert!(validate(&schema(), &json!({"symbol": "A", "limit": 0}))
            .unwrap_err()
            .contains(">="));
        assert!(validate(&schema(), &json!({"symbol": "A", "limit": 2.5}))
            .unwrap_err()
            .contains("integer"));
        assert!(validate(&schema(), &json!({"symbol": "   "})).is_err());
    }

    #[test]
    fn test_array_item_types() {
        let err = validate(&schema(), &json!({"symbol": "A", "indicators": ["rsi", 3]})).unwrap_err();
        assert!(err.contains("indicators[1]"));
    }

    #[test]
    fn test_non_object_arguments() {
        assert!(validate(&schema(), &json!([1, 2])).is_err());
    }
}
