use bytes::Bytes;

use llmhub_protocol::{WireFormat, claude, codex, openai};

/// What the last failed upstream attempt looked like. Provider identity is
/// for logs and the decision chain; it never reaches client payloads.
#[derive(Debug, Clone)]
pub struct UpstreamErrorDetail {
    pub provider_id: i64,
    pub provider_name: String,
    pub status: Option<u16>,
    pub message: String,
    /// Upstream response body, truncated.
    pub body_excerpt: String,
}

const BODY_EXCERPT_LIMIT: usize = 2048;

impl UpstreamErrorDetail {
    pub fn excerpt_of(body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        let mut excerpt: String = text.chars().take(BODY_EXCERPT_LIMIT).collect();
        if text.len() > excerpt.len() {
            excerpt.push('…');
        }
        excerpt
    }
}

/// Everything the pipeline can refuse or fail with, mapped onto the status
/// and envelope the client's own format uses.
#[derive(Debug)]
pub enum RelayError {
    InvalidRequest(String),
    Unauthorized(String),
    Blocked(String),
    RateLimited(String),
    NoProviderAvailable,
    TranslationUnsupported(String),
    UpstreamHttp { status: u16, detail: UpstreamErrorDetail },
    UpstreamNetwork(String),
    AllProvidersFailed { last: UpstreamErrorDetail },
}

impl RelayError {
    pub fn status(&self) -> u16 {
        match self {
            RelayError::InvalidRequest(_) => 400,
            RelayError::Unauthorized(_) => 401,
            RelayError::Blocked(_) => 403,
            RelayError::RateLimited(_) => 429,
            RelayError::NoProviderAvailable => 503,
            RelayError::TranslationUnsupported(_) => 500,
            RelayError::UpstreamHttp { status, .. } => *status,
            RelayError::UpstreamNetwork(_) => 502,
            RelayError::AllProvidersFailed { .. } => 502,
        }
    }

    /// Client-visible message. Upstream bodies are quoted (truncated); the
    /// provider behind them is not named.
    pub fn message(&self) -> String {
        match self {
            RelayError::InvalidRequest(message) => message.clone(),
            RelayError::Unauthorized(message) => message.clone(),
            RelayError::Blocked(word) => format!("request blocked by content policy: {word}"),
            RelayError::RateLimited(message) => message.clone(),
            RelayError::NoProviderAvailable => "no provider available for this model".to_string(),
            RelayError::TranslationUnsupported(message) => message.clone(),
            RelayError::UpstreamHttp { detail, .. } => upstream_message(detail),
            RelayError::UpstreamNetwork(message) => format!("upstream unreachable: {message}"),
            RelayError::AllProvidersFailed { last } => {
                let upstream = upstream_message(last);
                match last.status {
                    Some(status) => {
                        format!("all providers failed; last upstream status {status}: {upstream}")
                    }
                    None => format!("all providers failed; last error: {upstream}"),
                }
            }
        }
    }

    /// Serialize the error envelope in the caller's format.
    pub fn envelope(&self, format: WireFormat) -> Bytes {
        let status = self.status();
        let message = self.message();
        let body = match format {
            WireFormat::Claude => {
                serde_json::to_vec(&claude::error::ErrorResponse::for_status(status, message))
            }
            WireFormat::OpenAiChat => {
                serde_json::to_vec(&openai::error::ErrorResponse::for_status(status, message))
            }
            WireFormat::Codex => {
                serde_json::to_vec(&codex::error::ErrorResponse::for_status(status, message))
            }
            WireFormat::GeminiCli => serde_json::to_vec(&serde_json::json!({
                "error": {
                    "code": status,
                    "message": message,
                    "status": gemini_status_name(status),
                }
            })),
        };
        Bytes::from(body.unwrap_or_else(|_| b"{\"error\":\"internal\"}".to_vec()))
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl std::error::Error for RelayError {}

/// The inner message of a recognizable upstream error envelope; every
/// supported format nests it under `error.message`. Falls back to the raw
/// excerpt, then the transport message.
fn upstream_message(detail: &UpstreamErrorDetail) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&detail.body_excerpt)
        && let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str())
        && !message.is_empty()
    {
        return message.to_string();
    }
    if detail.body_excerpt.is_empty() {
        detail.message.clone()
    } else {
        detail.body_excerpt.clone()
    }
}

fn gemini_status_name(status: u16) -> &'static str {
    match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        _ => "INTERNAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_envelope_shape() {
        let err = RelayError::RateLimited("slow down".to_string());
        let body: serde_json::Value =
            serde_json::from_slice(&err.envelope(WireFormat::Claude)).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "rate_limit_error");
        assert_eq!(body["error"]["message"], "slow down");
    }

    #[test]
    fn openai_envelope_shape() {
        let err = RelayError::InvalidRequest("missing model".to_string());
        let body: serde_json::Value =
            serde_json::from_slice(&err.envelope(WireFormat::OpenAiChat)).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "missing model");
    }

    #[test]
    fn upstream_error_message_is_unwrapped() {
        let detail = UpstreamErrorDetail {
            provider_id: 1,
            provider_name: "alpha".to_string(),
            status: Some(429),
            message: "upstream returned 429".to_string(),
            body_excerpt: "{\"error\":{\"message\":\"quota exceeded\",\"type\":\"rate_limit_error\"}}"
                .to_string(),
        };
        let err = RelayError::UpstreamHttp {
            status: 429,
            detail,
        };
        assert_eq!(err.status(), 429);
        assert_eq!(err.message(), "quota exceeded");
    }

    #[test]
    fn provider_identity_never_reaches_the_client() {
        let detail = UpstreamErrorDetail {
            provider_id: 7,
            provider_name: "secret-upstream".to_string(),
            status: Some(500),
            message: "upstream returned 500".to_string(),
            body_excerpt: String::new(),
        };
        let err = RelayError::AllProvidersFailed { last: detail };
        let body = String::from_utf8(err.envelope(WireFormat::OpenAiChat).to_vec()).unwrap();
        assert!(!body.contains("secret-upstream"));
    }
}
