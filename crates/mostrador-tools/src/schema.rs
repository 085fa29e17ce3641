//! Argument validation against a JSON-schema subset
//!
//! Supports `type` (object, string, integer, number, boolean, array),
//! `properties`, `required` and `items`. Required fields must be present
//! and typed; unknown fields are dropped. Numeric strings are accepted for
//! numeric fields and numbers for string fields, since models emit both.

use crate::error::ToolError;
use serde_json::{Map, Value};

pub fn validate(schema: &Value, args: Value) -> Result<Value, ToolError> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    check(schema, args, "arguments")
}

fn check(schema: &Value, value: Value, path: &str) -> Result<Value, ToolError> {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => check_object(schema, value, path),
        Some("array") => match value {
            Value::Array(items) => {
                let item_schema = schema.get("items").cloned().unwrap_or(Value::Null);
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| check(&item_schema, item, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            other => Err(mismatch(path, "array", &other)),
        },
        Some("string") => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Err(mismatch(path, "string", &other)),
        },
        Some("integer") => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(mismatch(path, "integer", &Value::Number(n))),
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::from(i)),
                Err(_) => Err(mismatch(path, "integer", &Value::String(s))),
            },
            other => Err(mismatch(path, "integer", &other)),
        },
        Some("number") => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => match s.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                Some(n) => Ok(Value::Number(n)),
                None => Err(mismatch(path, "number", &Value::String(s))),
            },
            other => Err(mismatch(path, "number", &other)),
        },
        Some("boolean") => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(mismatch(path, "boolean", &other)),
        },
        // Untyped schema: accept as-is.
        _ => Ok(value),
    }
}

fn check_object(schema: &Value, value: Value, path: &str) -> Result<Value, ToolError> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => return Err(mismatch(path, "object", &other)),
    };
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Value::Object(fields));
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = Map::new();
    for (name, prop_schema) in properties {
        let field_path = format!("{}.{}", path, name);
        match fields.remove(name) {
            Some(Value::Null) | None => {
                if required.contains(&name.as_str()) {
                    return Err(ToolError::Input(format!("missing required field '{}'", field_path)));
                }
            }
            Some(v) => {
                out.insert(name.clone(), check(prop_schema, v, &field_path)?);
            }
        }
    }
    if !fields.is_empty() {
        tracing::debug!(dropped = ?fields.keys().collect::<Vec<_>>(), "dropping unknown argument fields");
    }
    Ok(Value::Object(out))
}

fn mismatch(path: &str, expected: &str, got: &Value) -> ToolError {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ToolError::Input(format!("'{}' must be {}, got {}", path, expected, got))
}
