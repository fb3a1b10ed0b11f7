use serde_json::Value;

use crate::error::AmoError;

pub fn print_data(data: &Value) {
    match data {
        Value::Null => {}
        Value::String(s) => println!("{s}"),
        other => println!(
            "{}",
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
        ),
    }
}

/// Render a failure for stderr, either as text or as the structured JSON form.
pub fn format_error(err: &AmoError, json: bool) -> String {
    if json {
        serde_json::to_string_pretty(&err.to_json()).unwrap_or_else(|_| err.to_string())
    } else {
        format!("Error: {err}")
    }
}
