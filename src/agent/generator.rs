//! SQL Generator

use crate::gateway::{GenerationResponse, ModelGateway};
use crate::llm::{LlmError, PromptKind};
use crate::prompts;
use tracing::info;

pub struct SqlGenerator {
    gateway: ModelGateway,
}

impl SqlGenerator {
    pub fn new(gateway: ModelGateway) -> Self {
        Self { gateway }
    }

    /// Turn a user request, or a regeneration instruction, into SQL.
    /// Faults that survive the stage retries are returned to the caller.
    pub async fn generate(&self, input: &str) -> Result<String, LlmError> {
        let prompt = prompts::generation_prompt(input);
        let response = self
            .gateway
            .call::<GenerationResponse>(PromptKind::Generation, &prompt)
            .await?;
        let sql = response.query.trim().to_string();
        info!("Generated SQL query: {}", sql);
        Ok(sql)
    }
}
