//! Topical guardrail for the chat front end
//!
//! A cheap keyword check over the latest user messages, with an optional
//! model fallback when no keyword matches. It decides whether a conversation
//! is on topic; it never sees SQL and never touches the store.

use crate::error::{NlqError, Result};
use crate::gateway::{GuardrailResponse, ModelGateway};
use crate::llm::PromptKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Messages considered by the keyword check.
const RECENT_MESSAGES: usize = 3;

/// Vocabulary that marks a message as healthcare / dataset related.
/// Entries are regex fragments matched on word boundaries.
pub const TOPIC_WORDS: &[&str] = &[
    "patients?",
    "doctors?",
    "physicians?",
    "nurses?",
    "hospitals?",
    "clinics?",
    "admissions?",
    "admitted",
    "discharge[ds]?",
    "billing",
    "bills?",
    "billed",
    "insurance",
    "insurers?",
    "medications?",
    "medicines?",
    "drugs?",
    "conditions?",
    "diagnos[ie]s",
    "blood",
    "tests?",
    "results?",
    "rooms?",
    "age",
    "gender",
    "diabetes",
    "hypertension",
    "asthma",
    "cancer",
    "obesity",
    "arthritis",
    "aspirin",
    "ibuprofen",
    "penicillin",
    "paracetamol",
    "lipitor",
    "aetna",
    "cigna",
    "medicare",
    "unitedhealthcare",
    "emergency",
    "elective",
    "urgent",
    "health",
    "healthcare",
    "medical",
    "treatments?",
    "records?",
    "database",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub struct TopicGuardrail {
    pattern: Regex,
    fallback: Option<ModelGateway>,
}

impl TopicGuardrail {
    pub fn new(fallback: Option<ModelGateway>) -> Result<Self> {
        let alternatives = TOPIC_WORDS.join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives))
            .map_err(|e| NlqError::Config(format!("invalid guardrail pattern: {}", e)))?;
        Ok(Self { pattern, fallback })
    }

    /// `true` when the conversation is on topic.
    pub async fn rail(&self, messages: &[ChatMessage]) -> bool {
        let flag = self.keyword_check(messages);
        debug!("Keyword guardrail check: {}", flag);
        if flag {
            return true;
        }
        match self.fallback {
            Some(ref gateway) => {
                let flag = self.model_check(gateway, messages).await;
                debug!("LLM guardrail check: {}", flag);
                flag
            }
            None => false,
        }
    }

    pub fn keyword_check(&self, messages: &[ChatMessage]) -> bool {
        let start = messages.len().saturating_sub(RECENT_MESSAGES);
        let text = messages[start..]
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.pattern.is_match(&text)
    }

    async fn model_check(&self, gateway: &ModelGateway, messages: &[ChatMessage]) -> bool {
        let transcript = match serde_json::to_string(messages) {
            Ok(t) => t,
            Err(e) => {
                warn!("Could not serialize conversation for guardrail: {}", e);
                return false;
            }
        };
        match gateway
            .call::<GuardrailResponse>(PromptKind::Guardrail, &guardrail_prompt(&transcript))
            .await
        {
            Ok(response) => response.flag,
            Err(e) => {
                warn!("Guardrail call failed, treating conversation as off topic: {}", e);
                false
            }
        }
    }
}

fn guardrail_prompt(transcript: &str) -> String {
    format!(
        r#"You guard a search assistant for a hospital admissions database.
Decide whether the latest user message, read in the context of the conversation, asks about healthcare,
patients, doctors, hospitals, billing, insurance, medications or other data in that database,
or is a follow-up to such a question.
Reply with a JSON object: {{"flag": true}} if it is on topic, {{"flag": false}} otherwise.
---
Conversation (JSON):
{}"#,
        transcript
    )
}
