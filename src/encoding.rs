use serde_json::Value;
use url::form_urlencoded;

use crate::error::AmoError;

/// Encode `data` as a query string using bracket notation for nesting:
/// `{"filter": {"id": [1, 2]}}` becomes `filter%5Bid%5D%5B0%5D=1&filter%5Bid%5D%5B1%5D=2`.
///
/// Anything other than an object or array at the top level encodes to an
/// empty string.
pub fn encode_query(data: &Value) -> String {
    let mut pairs = Vec::new();
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                flatten(key.clone(), value, &mut pairs);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(index.to_string(), value, &mut pairs);
            }
        }
        _ => {}
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn flatten(prefix: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                flatten(format!("{prefix}[{key}]"), inner, out);
            }
        }
        Value::Array(items) => {
            for (index, inner) in items.iter().enumerate() {
                flatten(format!("{prefix}[{index}]"), inner, out);
            }
        }
        Value::String(s) => out.push((prefix, s.clone())),
        Value::Null => out.push((prefix, String::new())),
        other => out.push((prefix, other.to_string())),
    }
}

pub fn encode_body(data: &Value) -> Result<String, AmoError> {
    serde_json::to_string(data).map_err(|e| AmoError::InvalidBody {
        status: 0,
        raw: String::new(),
        reason: format!("Failed to serialize request body: {e}"),
    })
}

/// Append an encoded query to `url`, respecting an existing query part.
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}
