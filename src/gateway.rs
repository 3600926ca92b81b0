//! Model gateway
//!
//! Wraps a [`LanguageModel`] with the per-call timeout, the stage-boundary
//! retry policy and the response contracts. Every stage reaches the model
//! through [`ModelGateway::call`], so a response with the wrong shape is
//! caught here and retried like any other transient fault.

use crate::llm::{LanguageModel, LlmError, LlmRequest, PromptKind};
use crate::retry::RetryPolicy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A typed response a stage expects back from the model
pub trait ResponseContract: DeserializeOwned {
    /// Checks that serde cannot express. Returns the reason on failure.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// `{"is_valid": bool, "message"?: string}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ValidationResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResponseContract for ValidationResponse {
    fn check(&self) -> Result<(), String> {
        let has_message = self
            .message
            .as_deref()
            .map(|m| !m.trim().is_empty())
            .unwrap_or(false);
        if !self.is_valid && !has_message {
            return Err("rejection without a message".to_string());
        }
        Ok(())
    }
}

/// `{"query": string}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerationResponse {
    pub query: String,
}

impl ResponseContract for GenerationResponse {
    fn check(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("empty query".to_string());
        }
        Ok(())
    }
}

/// `{"reasoning": string, "is_correct": bool}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReviewResponse {
    pub reasoning: String,
    pub is_correct: bool,
}

impl ResponseContract for ReviewResponse {}

/// `{"flag": bool}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GuardrailResponse {
    pub flag: bool,
}

impl ResponseContract for GuardrailResponse {}

fn decode<T: ResponseContract>(value: Value) -> Result<T, LlmError> {
    let parsed: T = serde_json::from_value(value.clone()).map_err(|e| {
        LlmError::Malformed(format!("{} (response: {})", e, value))
    })?;
    parsed
        .check()
        .map_err(|reason| LlmError::Malformed(format!("{} (response: {})", reason, value)))?;
    Ok(parsed)
}

#[derive(Clone)]
pub struct ModelGateway {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ModelGateway {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            model,
            retry,
            call_timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send `prompt` and decode the reply as `T`, retrying transient faults.
    pub async fn call<T: ResponseContract>(
        &self,
        kind: PromptKind,
        prompt: &str,
    ) -> Result<T, LlmError> {
        let label = format!("{} call", kind);
        self.retry
            .retry(&label, || self.call_once::<T>(kind, prompt), LlmError::is_transient)
            .await
    }

    async fn call_once<T: ResponseContract>(
        &self,
        kind: PromptKind,
        prompt: &str,
    ) -> Result<T, LlmError> {
        let request = LlmRequest::new(kind, prompt);
        let value = tokio::time::timeout(self.call_timeout, self.model.invoke(request))
            .await
            .map_err(|_| LlmError::Timeout(self.call_timeout))??;
        decode(value)
    }
}
