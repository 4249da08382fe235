//! CLI parsing helpers for clap value parsers.

use serde_json::Value;

pub(super) fn parse_payload(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|err| format!("payload is not valid JSON: {err}"))
}

pub(super) fn parse_worker_name(s: &str) -> Result<String, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(String::from("worker name must not be empty"));
    }
    Ok(trimmed.to_owned())
}
