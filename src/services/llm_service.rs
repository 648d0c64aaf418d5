use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Failures of one model attempt, split along the retry policy: rate limits
/// are backed off, fatal configuration problems abort the whole cascade,
/// everything else falls through to the next candidate model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid API credentials: {0}")]
    InvalidCredentials(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("model service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LlmError::InvalidCredentials(_)
                | LlmError::QuotaExhausted(_)
                | LlmError::MalformedRequest(_)
        )
    }
}

/// One chat completion against a named candidate model. The trait is the seam
/// the orchestrator is tested through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
}

impl GroqClient {
    pub fn new(api_key: String, client: Client) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2,
            "max_tokens": max_tokens,
        });

        let res = self
            .client
            .post(GROQ_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        #[derive(serde::Deserialize)]
        struct RespMessage {
            content: String,
        }
        #[derive(serde::Deserialize)]
        struct RespChoice {
            message: RespMessage,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            choices: Vec<RespChoice>,
        }

        let body: Resp = res.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Api {
                status: status.as_u16(),
                message: "response contained no choices".to_string(),
            })
    }
}

fn classify_failure(status: StatusCode, body: String) -> LlmError {
    let lowered = body.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited(body);
    }
    if status == StatusCode::UNAUTHORIZED || lowered.contains("api_key") {
        return LlmError::InvalidCredentials(body);
    }
    if lowered.contains("quota") || lowered.contains("insufficient") {
        return LlmError::QuotaExhausted(body);
    }
    if status == StatusCode::BAD_REQUEST || lowered.contains("invalid_request") {
        return LlmError::MalformedRequest(body);
    }
    LlmError::Api {
        status: status.as_u16(),
        message: body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limits() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(err.is_rate_limit());
        assert!(!err.is_fatal());
    }

    #[test]
    fn classifies_credential_failures_as_fatal() {
        let err = classify_failure(StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(err, LlmError::InvalidCredentials(_)));
        assert!(err.is_fatal());

        let err = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": "invalid_api_key"}}"#.into(),
        );
        assert!(matches!(err, LlmError::InvalidCredentials(_)));
    }

    #[test]
    fn classifies_quota_exhaustion_as_fatal() {
        let err = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": "insufficient_quota"}}"#.into(),
        );
        assert!(matches!(err, LlmError::QuotaExhausted(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn classifies_bad_requests_as_fatal() {
        let err = classify_failure(StatusCode::BAD_REQUEST, "context too long".into());
        assert!(matches!(err, LlmError::MalformedRequest(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn other_statuses_are_transient() {
        let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "oops".into());
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
        assert!(!err.is_fatal());
        assert!(!err.is_rate_limit());
    }
}
