//! Typed provider errors.
//!
//! Both Anthropic and OpenAI-compatible APIs return a JSON body of the form
//! `{"error": {"type": "...", "code": "...", "message": "..."}}` on failure.
//! The status code and the `type`/`code` fields are enough to tell throttling,
//! exhausted quota and oversized prompts apart, so callers can branch on the
//! variant instead of inspecting message text.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    /// Request rate exceeded; the provider asked us to slow down.
    #[error("rate limited by provider: {message}")]
    RateLimited { message: String },

    /// Account quota or credit exhausted. Retrying will not help.
    #[error("provider quota exhausted: {message}")]
    QuotaExhausted { message: String },

    /// Prompt exceeds the model's context window.
    #[error("context length exceeded: {message}")]
    ContextLengthExceeded { message: String },

    /// Any other non-success response.
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AiError {
    /// Classify a non-success HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| body.to_string());
        let markers: Vec<&str> = parsed
            .as_ref()
            .map(|e| {
                [e.kind.as_deref(), e.code.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect()
            })
            .unwrap_or_default();
        let has = |m: &str| markers.iter().any(|k| *k == m);

        if status == 413
            || has("context_length_exceeded")
            || has("request_too_large")
            || (has("invalid_request_error") && reports_prompt_length(&message))
        {
            return AiError::ContextLengthExceeded { message };
        }
        if has("insufficient_quota") || has("billing_error") || status == 402 {
            return AiError::QuotaExhausted { message };
        }
        if status == 429 || has("rate_limit_error") || has("rate_limit_exceeded") {
            return AiError::RateLimited { message };
        }
        AiError::Api { status, message }
    }

    /// The provider refused this exact request; resending it cannot succeed.
    pub fn is_rejected(&self) -> bool {
        match self {
            AiError::Api { status, .. } => (400..500).contains(status) && *status != 408,
            AiError::Header(_) => true,
            _ => false,
        }
    }

    /// Whether a later retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Api { status, .. } => *status >= 500 || *status == 408,
            AiError::Http(_) => true,
            _ => false,
        }
    }
}

/// Anthropic reports an oversized prompt as a plain `invalid_request_error`
/// ("prompt is too long: 215000 tokens > 200000 maximum").
fn reports_prompt_length(message: &str) -> bool {
    let lowered = message.to_lowercase();
    ["prompt is too long", "context window", "context length", "too many tokens"]
        .iter()
        .any(|m| lowered.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        let err = AiError::from_response(429, "slow down");
        assert!(matches!(err, AiError::RateLimited { .. }));
    }

    #[test]
    fn anthropic_rate_limit_body_is_rate_limited() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"Number of requests has exceeded your rate limit"}}"#;
        let err = AiError::from_response(429, body);
        match err {
            AiError::RateLimited { message } => assert!(message.contains("rate limit")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn openai_insufficient_quota_wins_over_429() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let err = AiError::from_response(429, body);
        assert!(matches!(err, AiError::QuotaExhausted { .. }));
    }

    #[test]
    fn context_length_code_is_classified() {
        let body = r#"{"error":{"message":"too many tokens","type":"invalid_request_error","code":"context_length_exceeded"}}"#;
        let err = AiError::from_response(400, body);
        assert!(matches!(err, AiError::ContextLengthExceeded { .. }));
    }

    #[test]
    fn anthropic_prompt_too_long_is_context_length() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"prompt is too long: 215000 tokens > 200000 maximum"}}"#;
        let err = AiError::from_response(400, body);
        assert!(matches!(err, AiError::ContextLengthExceeded { .. }));
        assert!(!err.is_transient());
        assert!(!err.is_rejected());
    }

    #[test]
    fn other_invalid_requests_are_rejected() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"tools.0.input_schema: invalid"}}"#;
        let err = AiError::from_response(400, body);
        assert!(matches!(err, AiError::Api { status: 400, .. }));
        assert!(err.is_rejected());
        assert!(!AiError::from_response(503, "").is_rejected());
        assert!(!AiError::from_response(408, "").is_rejected());
    }

    #[test]
    fn payload_too_large_is_context_length() {
        let err = AiError::from_response(413, "");
        assert!(matches!(err, AiError::ContextLengthExceeded { .. }));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = AiError::from_response(503, "unavailable");
        assert!(err.is_transient());
        let err = AiError::from_response(400, r#"{"error":{"type":"invalid_request_error","message":"bad"}}"#);
        assert!(!err.is_transient());
        match err {
            AiError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
