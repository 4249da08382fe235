//! Mapping of run outcomes onto HTTP-shaped JSON responses.

use serde::Serialize;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::outcome::{DecodedOutcome, FailureKind};

/// Envelope key used when a profile does not name one.
pub const DEFAULT_ENVELOPE_KEY: &str = "data";

/// Message returned for a duplicate submission.
pub const DUPLICATE_REQUEST_MESSAGE: &str = "Request already in progress. Please wait.";

/// Status code and JSON body ready to hand to an HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// HTTP status for an outcome.
#[must_use]
pub const fn status_for(outcome: &DecodedOutcome) -> u16 {
    match outcome.failure_kind() {
        None => 200,
        Some(FailureKind::Timeout) => 408,
        Some(FailureKind::Cancelled) => 499,
        Some(_) => 500,
    }
}

/// Response for a request rejected by the active request store.
#[must_use]
pub fn duplicate_request_response() -> HttpResponse {
    let mut body = Map::new();
    body.insert(String::from("success"), Value::Bool(false));
    body.insert(
        String::from("error"),
        Value::String(String::from(DUPLICATE_REQUEST_MESSAGE)),
    );
    HttpResponse {
        status: 429,
        body: Value::Object(body),
    }
}

/// Shapes outcomes into response bodies.
///
/// # Examples
///
/// ```
/// use carebridge::outcome::DecodedOutcome;
/// use carebridge::response::Envelope;
/// use serde_json::json;
///
/// let outcome = DecodedOutcome::Success(json!({"label": "healthy"}));
/// let response = Envelope::new("prediction").respond(&outcome);
/// assert_eq!(response.status, 200);
/// assert_eq!(
///     response.body,
///     json!({"success": true, "prediction": {"label": "healthy"}})
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    key: String,
    timestamp: bool,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new(DEFAULT_ENVELOPE_KEY)
    }
}

impl Envelope {
    /// Wrap successful payloads under `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: false,
        }
    }

    /// Add an RFC 3339 `timestamp` field to every body.
    #[must_use]
    pub const fn with_timestamp(mut self) -> Self {
        self.timestamp = true;
        self
    }

    /// Key successful payloads are stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the response for `outcome`, stamping the current time if enabled.
    #[must_use]
    pub fn respond(&self, outcome: &DecodedOutcome) -> HttpResponse {
        self.respond_at(outcome, OffsetDateTime::now_utc())
    }

    /// Build the response for `outcome` as of `now`.
    #[must_use]
    pub fn respond_at(&self, outcome: &DecodedOutcome, now: OffsetDateTime) -> HttpResponse {
        let mut body = Map::new();
        match outcome {
            DecodedOutcome::Success(payload) => {
                body.insert(String::from("success"), Value::Bool(true));
                body.insert(self.key.clone(), payload.clone());
            }
            DecodedOutcome::Failure(failure) => {
                body.insert(String::from("success"), Value::Bool(false));
                body.insert(String::from("error"), Value::String(failure.message.clone()));
                if let Some(details) = &failure.raw_output {
                    body.insert(String::from("details"), Value::String(details.clone()));
                }
            }
        }
        if self.timestamp {
            match now.format(&Rfc3339) {
                Ok(stamp) => {
                    body.insert(String::from("timestamp"), Value::String(stamp));
                }
                Err(err) => tracing::warn!("failed to format response timestamp: {err}"),
            }
        }
        HttpResponse {
            status: status_for(outcome),
            body: Value::Object(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Failure;
    use rstest::rstest;
    use serde_json::json;
    use time::macros::datetime;

    #[rstest]
    #[case(FailureKind::Timeout, 408)]
    #[case(FailureKind::Cancelled, 499)]
    #[case(FailureKind::SpawnError, 500)]
    #[case(FailureKind::NonZeroExit, 500)]
    #[case(FailureKind::MalformedOutput, 500)]
    #[case(FailureKind::EmptyOutput, 500)]
    #[case(FailureKind::ProcessFailed, 500)]
    fn failure_statuses(#[case] kind: FailureKind, #[case] status: u16) {
        assert_eq!(status_for(&DecodedOutcome::failure(kind, "x")), status);
    }

    #[test]
    fn default_envelope_uses_data_key() {
        let response = Envelope::default().respond(&DecodedOutcome::Success(json!([1, 2])));
        assert_eq!(response.body, json!({"success": true, "data": [1, 2]}));
        assert!(response.is_success());
    }

    #[test]
    fn failure_body_carries_details() {
        let outcome = DecodedOutcome::Failure(
            Failure::new(FailureKind::NonZeroExit, "worker exited with status 7: boom")
                .with_raw_output("boom"),
        );
        let response = Envelope::new("result").respond(&outcome);
        assert_eq!(response.status, 500);
        assert_eq!(
            response.body,
            json!({
                "success": false,
                "error": "worker exited with status 7: boom",
                "details": "boom",
            })
        );
    }

    #[test]
    fn failure_without_raw_output_omits_details() {
        let response =
            Envelope::default().respond(&DecodedOutcome::failure(FailureKind::Timeout, "late"));
        assert_eq!(response.body, json!({"success": false, "error": "late"}));
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let response = Envelope::new("recommendations")
            .with_timestamp()
            .respond_at(
                &DecodedOutcome::Success(json!({"tips": []})),
                datetime!(2024-05-01 08:30:00 UTC),
            );
        assert_eq!(
            response.body.get("timestamp"),
            Some(&json!("2024-05-01T08:30:00Z"))
        );
    }

    #[test]
    fn duplicate_request_is_429() {
        let response = duplicate_request_response();
        assert_eq!(response.status, 429);
        assert_eq!(
            response.body,
            json!({"success": false, "error": DUPLICATE_REQUEST_MESSAGE})
        );
    }
}
