//! Query Validator
//!
//! Rejects requests that would modify data or that the dataset cannot answer.

use crate::gateway::{ModelGateway, ValidationResponse};
use crate::llm::PromptKind;
use crate::prompts;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Present iff the request was rejected
    pub message: Option<String>,
}

impl ValidationVerdict {
    pub fn accepted() -> Self {
        Self {
            is_valid: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: Some(message.into()),
        }
    }
}

pub struct QueryValidator {
    gateway: ModelGateway,
}

impl QueryValidator {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// A model that cannot be reached rejects the request; it never lets
    /// an unchecked request through.
    pub async fn check(&self, user_query: &str) -> ValidationVerdict {
        let prompt = prompts::validation_prompt(user_query);
        let verdict = match self
            .gateway
            .call::<ValidationResponse>(PromptKind::Validation, &prompt)
            .await
        {
            Ok(response) if response.is_valid => ValidationVerdict::accepted(),
            Ok(response) => ValidationVerdict::rejected(response.message.unwrap_or_default()),
            Err(e) => {
                warn!("Validation call failed: {}", e);
                ValidationVerdict::rejected(format!("The request could not be validated: {}", e))
            }
        };
        info!(
            "Validation result: {}, message: {:?}",
            verdict.is_valid, verdict.message
        );
        verdict
    }
}
