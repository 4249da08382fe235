//! Argument redaction for worker launch logs.
//!
//! Worker arguments routinely carry patient data, so the launch line never
//! prints secrets or inline JSON bodies verbatim.

use super::WorkerSpec;

const REDACTED: &str = "***REDACTED***";
const JSON_PREVIEW_CHARS: usize = 16;

fn is_sensitive_key(key: &str) -> bool {
    const SENSITIVE_KEYS: [&str; 9] = [
        "password",
        "pin",
        "token",
        "secret",
        "api_key",
        "apikey",
        "auth",
        "authorization",
        "otp",
    ];
    SENSITIVE_KEYS
        .iter()
        .any(|candidate| key.eq_ignore_ascii_case(candidate))
}

fn looks_like_json(arg: &str) -> bool {
    let trimmed = arg.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Redact a single argument for logging.
///
/// `key=value` pairs with a sensitive key keep the key and lose the value.
/// Inline JSON documents are shortened to a preview and their length.
#[must_use]
pub fn redact_argument(arg: &str) -> String {
    if let Some((key, _)) = arg.split_once('=')
        && is_sensitive_key(key.trim())
    {
        return format!("{}={REDACTED}", key.trim());
    }
    if looks_like_json(arg) {
        let total = arg.chars().count();
        if total > JSON_PREVIEW_CHARS {
            let preview: String = arg.chars().take(JSON_PREVIEW_CHARS).collect();
            return format!("{preview}…({total} chars)");
        }
    }
    arg.to_owned()
}

/// Render the spec's command line with every argument redacted and quoted.
#[must_use]
pub fn describe_command(spec: &WorkerSpec) -> String {
    let mut parts = Vec::with_capacity(spec.args().len() + 1);
    parts.push(spec.program().to_owned());
    parts.extend(spec.args().iter().map(|arg| redact_argument(arg)));
    shlex::try_join(parts.iter().map(String::as_str)).unwrap_or_else(|_| parts.join(" "))
}
