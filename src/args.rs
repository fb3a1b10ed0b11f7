use serde_json::{json, Map, Value};

use crate::error::AmoError;

/// Parse CLI parameters into a JSON object.
///
/// Supports `key:value` and `key=value`; whichever separator comes first
/// splits the pair, so `url=http://x` keeps its colon. Values are
/// auto-coerced:
/// - Quoted strings have quotes stripped
/// - `true`/`false` become booleans
/// - Valid numbers become JSON numbers
/// - JSON objects and arrays are parsed
/// - Everything else stays a string
pub fn parse_params(args: &[String]) -> Result<Value, AmoError> {
    let mut map = Map::new();
    for arg in args {
        let Some(pos) = arg.find([':', '=']) else {
            return Err(AmoError::InvalidArgument(format!(
                "Cannot parse argument '{arg}': expected 'key:value' or 'key=value'"
            )));
        };
        let (key, raw_value) = (&arg[..pos], &arg[pos + 1..]);
        if key.is_empty() {
            return Err(AmoError::InvalidArgument(format!(
                "Empty key in argument '{arg}'"
            )));
        }
        map.insert(key.to_string(), coerce_value(raw_value));
    }
    Ok(Value::Object(map))
}

/// Parse the `--data` payload of a write command. Must be a JSON object or
/// array.
pub fn parse_data(raw: Option<&str>) -> Result<Value, AmoError> {
    let Some(raw) = raw else {
        return Ok(json!({}));
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AmoError::InvalidArgument(format!("--data is not valid JSON: {e}")))?;
    if !value.is_object() && !value.is_array() {
        return Err(AmoError::InvalidArgument(
            "--data must be a JSON object or array".into(),
        ));
    }
    Ok(value)
}

fn coerce_value(raw: &str) -> Value {
    if ((raw.starts_with('"') && raw.ends_with('"'))
        || (raw.starts_with('\'') && raw.ends_with('\'')))
        && raw.len() >= 2
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }

    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw == "null" {
        return Value::Null;
    }

    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }

    if (raw.starts_with('{') && raw.ends_with('}'))
        || (raw.starts_with('[') && raw.ends_with(']'))
    {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
    }

    Value::String(raw.to_string())
}
