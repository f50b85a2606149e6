//! Classification service boundary and its OpenAI-compatible client
//!
//! Every per-record transform funnels through `Classifier::classify`. The
//! production client speaks the chat-completions protocol over `reqwest`
//! and retries transient rate limiting with exponential backoff; exhausted
//! account quota is surfaced as its own error so workers can abort the run
//! instead of burning the retry budget.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// One classification result with the token usage the service reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub value: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
}

#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    #[error("classification service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Temporary throttling (requests/tokens per minute). Retried by the
    /// client before being surfaced.
    #[error("classification service rate limit exceeded")]
    RateLimited,

    /// Account credits exhausted. Never retried; fatal to the run.
    #[error("classification service quota exhausted")]
    QuotaExhausted,

    #[error("malformed classification response: {0}")]
    MalformedResponse(String),
}

impl ClassifyError {
    /// Only quota exhaustion aborts a run; everything else is contained at
    /// the record it occurred on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClassifyError::QuotaExhausted)
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `prompt` under an optional system instruction.
    async fn classify(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Classification, ClassifyError>;
}

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_RETRIES: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_API_BASE, DEFAULT_MODEL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn request_once(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Classification, ClassifyError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_throttle_error(&text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifyError::ServiceUnavailable(format!(
                "HTTP {status}: {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;

        let value = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| {
                ClassifyError::MalformedResponse("response contained no choices".to_string())
            })?;
        if value.is_empty() {
            return Err(ClassifyError::MalformedResponse(
                "response content was empty".to_string(),
            ));
        }

        let usage = parsed.usage.unwrap_or_default();
        Ok(Classification {
            value,
            tokens_input: usage.prompt_tokens,
            tokens_output: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Classification, ClassifyError> {
        let mut attempt = 0;
        loop {
            match self
                .request_once(system_prompt, prompt, max_tokens, temperature)
                .await
            {
                Err(ClassifyError::RateLimited) if attempt + 1 < MAX_RETRIES => {
                    // 0.5s, 1s, 2s, 4s before the final attempt.
                    let wait = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        wait_ms = wait.as_millis() as u64,
                        "classification service rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Distinguish exhausted account quota from temporary throttling in a 429
/// response body.
fn classify_throttle_error(body: &str) -> ClassifyError {
    let lower = body.to_lowercase();
    if lower.contains("insufficient_quota") || lower.contains("billing") {
        ClassifyError::QuotaExhausted
    } else {
        ClassifyError::RateLimited
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhaustion_is_not_mistaken_for_throttling() {
        let err = classify_throttle_error(
            r#"{"error": {"code": "insufficient_quota", "message": "You exceeded your current quota"}}"#,
        );
        assert!(matches!(err, ClassifyError::QuotaExhausted));
        assert!(err.is_fatal());

        let err = classify_throttle_error(
            r#"{"error": {"code": "rate_limit_exceeded", "message": "Rate limit reached"}}"#,
        );
        assert!(matches!(err, ClassifyError::RateLimited));
        assert!(!err.is_fatal());
    }

    #[test]
    fn chat_response_parses_with_and_without_usage() {
        let with_usage = r#"{
            "choices": [{"message": {"content": " Arroz Agulha 1kg "}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(with_usage).unwrap();
        assert_eq!(parsed.usage.as_ref().unwrap().prompt_tokens, 120);
        assert_eq!(
            parsed.choices[0].message.content.trim(),
            "Arroz Agulha 1kg"
        );

        let without_usage = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(without_usage).unwrap();
        assert!(parsed.usage.is_none());
    }
}
