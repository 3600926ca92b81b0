//! Language-model client
//!
//! The pipeline talks to the model through [`LanguageModel`]: a prompt goes
//! in, a JSON object comes out. [`OpenAiClient`] is the production
//! implementation against an OpenAI-compatible chat-completions API in JSON
//! mode.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Which pipeline stage a prompt belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Validation,
    Generation,
    Review,
    Guardrail,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromptKind::Validation => "validation",
            PromptKind::Generation => "generation",
            PromptKind::Review => "review",
            PromptKind::Guardrail => "guardrail",
        };
        f.write_str(name)
    }
}

/// LLM request payload
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub kind: PromptKind,
    pub prompt: String,
}

impl LlmRequest {
    pub fn new(kind: PromptKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
        }
    }
}

/// LLM errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM API call failed: {0}")]
    Http(String),

    #[error("LLM API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed LLM response: {0}")]
    Malformed(String),

    #[error("LLM API error: {0}")]
    Api(String),
}

impl LlmError {
    /// Faults worth another attempt. Bad credentials and rejected requests
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Timeout(_) | LlmError::Malformed(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::Api(_) => false,
        }
    }
}

/// Text-in, JSON-object-out model service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<Value, LlmError>;
}

#[async_trait]
impl LanguageModel for Arc<dyn LanguageModel> {
    async fn invoke(&self, request: LlmRequest) -> Result<Value, LlmError> {
        (**self).invoke(request).await
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "Answer with a single JSON object only."},
                {"role": "user", "content": prompt}
            ],
            "response_format": {"type": "json_object"},
        });
        // Reasoning models reject a custom temperature.
        if !is_reasoning_model(&self.model) {
            body["temperature"] = serde_json::json!(0.0);
        }
        body
    }
}

fn is_reasoning_model(model: &str) -> bool {
    model.starts_with('o') || model.starts_with("gpt-5")
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn invoke(&self, request: LlmRequest) -> Result<Value, LlmError> {
        debug!("Calling {} for {} prompt", self.model, request.kind);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request.prompt))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(format!("response is not JSON: {}", e)))?;
        extract_json_content(&response_json)
    }
}

/// Pull the JSON object out of a chat-completions response.
fn extract_json_content(response: &Value) -> Result<Value, LlmError> {
    if let Some(error) = response.get("error") {
        return Err(LlmError::Api(error.to_string()));
    }

    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => {
            return Err(LlmError::Api(
                "response was filtered by content policy".to_string(),
            ))
        }
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    let content = choice["message"]["content"]
        .as_str()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::Malformed("no content in response".to_string()))?;

    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| LlmError::Malformed(format!("content is not JSON: {}", e)))?;
    if !value.is_object() {
        return Err(LlmError::Malformed(format!(
            "expected a JSON object, got: {}",
            value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_extracts_json_object() {
        let value = extract_json_content(&completion(r#"{"query": "SELECT 1"}"#)).unwrap();
        assert_eq!(value, json!({"query": "SELECT 1"}));
    }

    #[test]
    fn test_strips_markdown_fence() {
        let value =
            extract_json_content(&completion("```json\n{\"is_valid\": true}\n```")).unwrap();
        assert_eq!(value, json!({"is_valid": true}));
    }

    #[test]
    fn test_non_object_content_is_malformed() {
        let err = extract_json_content(&completion("[1, 2]")).unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));

        let err = extract_json_content(&completion("SELECT 1")).unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));

        let err = extract_json_content(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));
    }

    #[test]
    fn test_api_error_and_content_filter() {
        let err = extract_json_content(&json!({"error": {"message": "quota"}})).unwrap_err();
        assert!(matches!(err, LlmError::Api(_)));

        let filtered = json!({"choices": [{"message": {"content": "{}"}, "finish_reason": "content_filter"}]});
        assert!(matches!(
            extract_json_content(&filtered),
            Err(LlmError::Api(_))
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(LlmError::Malformed("x".into()).is_transient());
        assert!(LlmError::Status { status: 429, body: String::new() }.is_transient());
        assert!(LlmError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!LlmError::Status { status: 401, body: String::new() }.is_transient());
        assert!(!LlmError::Api("filtered".into()).is_transient());
    }

    #[test]
    fn test_reasoning_models_skip_temperature() {
        let client = OpenAiClient::new(
            "key".into(),
            "o4-mini".into(),
            "http://localhost/v1/".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(client.request_body("hi").get("temperature").is_none());
        assert_eq!(client.base_url, "http://localhost/v1");

        let client = OpenAiClient::new(
            "key".into(),
            "gpt-4o-mini".into(),
            "http://localhost/v1".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.request_body("hi")["temperature"], json!(0.0));
    }
}
