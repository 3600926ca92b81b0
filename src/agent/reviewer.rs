//! SQL Reviewer
//!
//! Critiques a candidate query against the request it was generated for.

use crate::gateway::{ModelGateway, ReviewResponse};
use crate::llm::PromptKind;
use crate::prompts;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub is_correct: bool,
    pub reasoning: String,
}

pub struct SqlReviewer {
    gateway: ModelGateway,
}

impl SqlReviewer {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// A review that could not run counts as a failed review.
    pub async fn review(&self, user_query: &str, candidate: &str) -> ReviewVerdict {
        let prompt = prompts::review_prompt(user_query, candidate);
        match self
            .gateway
            .call::<ReviewResponse>(PromptKind::Review, &prompt)
            .await
        {
            Ok(response) => {
                info!(
                    "Review result: correct={}, reasoning: {}",
                    response.is_correct, response.reasoning
                );
                ReviewVerdict {
                    is_correct: response.is_correct,
                    reasoning: response.reasoning,
                }
            }
            Err(e) => {
                warn!("Review call failed: {}", e);
                ReviewVerdict {
                    is_correct: false,
                    reasoning: format!("The query could not be reviewed: {}", e),
                }
            }
        }
    }
}
