//! Query Orchestrator
//!
//! Validating -> Generating -> (Reviewing)* -> Executing -> Shaping -> Done,
//! with an abort reachable from every stage. An abort always produces an
//! envelope with `error` set and `result = "[]"`; nothing escapes
//! [`QueryAgent::run_query_tool`] as an error.

use crate::agent::envelope::QueryEnvelope;
use crate::agent::generator::SqlGenerator;
use crate::agent::reviewer::SqlReviewer;
use crate::agent::validator::QueryValidator;
use crate::config::PipelineConfig;
use crate::execution::{shape_rows, QueryFailure, RowSet, TabularStore};
use crate::gateway::ModelGateway;
use crate::llm::LlmError;
use crate::prompts;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Review attempts before the final check.
pub const MAX_REVIEW_ATTEMPTS: usize = 3;

pub const NO_CORRECT_QUERY: &str = "No correct query could be produced for this request.";

/// Stages whose model faults can end a pipeline attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generating,
    Reviewing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Generating => "generating",
            Stage::Reviewing => "reviewing",
        };
        f.write_str(name)
    }
}

/// A model fault that outlived the stage retries
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineFault {
    pub stage: Stage,
    #[source]
    pub source: LlmError,
}

pub struct QueryAgent {
    validator: QueryValidator,
    generator: SqlGenerator,
    reviewer: SqlReviewer,
    store: Arc<TabularStore>,
    config: PipelineConfig,
}

impl QueryAgent {
    /// Fails when `config` is invalid, e.g. a zero truncation limit.
    pub fn new(
        gateway: ModelGateway,
        store: Arc<TabularStore>,
        config: PipelineConfig,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Self {
            validator: QueryValidator::new(gateway.clone()),
            generator: SqlGenerator::new(gateway.clone()),
            reviewer: SqlReviewer::new(gateway),
            store,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes a natural-language request on the healthcare table: validate,
    /// generate SQL, optionally review it, run it and shape the rows.
    pub async fn run_query_tool(&self, user_query: &str) -> QueryEnvelope {
        let span = info_span!("query_tool", request_id = %Uuid::new_v4());
        self.run_with_retries(user_query).instrument(span).await
    }

    async fn run_with_retries(&self, user_query: &str) -> QueryEnvelope {
        info!("Received user query: {}", user_query);
        let start = Instant::now();
        let attempts = self.config.pipeline_attempts.max(1);

        let mut last_fault = None;
        for attempt in 1..=attempts {
            match self.run_pipeline(user_query).await {
                Ok(envelope) => {
                    info!(
                        "Finished in {}ms after {} pipeline attempt(s), error: {:?}",
                        start.elapsed().as_millis(),
                        attempt,
                        envelope.error
                    );
                    return envelope;
                }
                Err(fault) => {
                    warn!("Pipeline attempt {}/{} failed: {}", attempt, attempts, fault);
                    last_fault = Some(fault);
                }
            }
        }

        let reason = last_fault
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown fault".to_string());
        warn!(
            "Giving up after {} pipeline attempts in {}ms",
            attempts,
            start.elapsed().as_millis()
        );
        QueryEnvelope::aborted(
            user_query,
            format!("Failed to answer the request after {} attempts: {}", attempts, reason),
        )
    }

    /// One pass through the pipeline. Verdicts and execution failures come
    /// back as aborted envelopes; only model faults worth a full rerun come
    /// back as `Err`.
    async fn run_pipeline(&self, user_query: &str) -> Result<QueryEnvelope, PipelineFault> {
        let verdict = self.validator.check(user_query).await;
        if !verdict.is_valid {
            warn!("Invalid query: {}", user_query);
            return Ok(QueryEnvelope::aborted(
                user_query,
                verdict.message.unwrap_or_default(),
            ));
        }

        let candidate = self
            .generator
            .generate(user_query)
            .await
            .map_err(|source| PipelineFault {
                stage: Stage::Generating,
                source,
            })?;

        let sql = if self.config.double_check {
            match self.double_check(user_query, candidate).await? {
                Some(sql) => sql,
                None => return Ok(QueryEnvelope::aborted(user_query, NO_CORRECT_QUERY)),
            }
        } else {
            candidate
        };

        let rows = match self.execute(&sql).await {
            Ok(rows) => rows,
            Err(failure) => {
                warn!("Error executing SQL query: {}", failure);
                return Ok(QueryEnvelope::aborted(user_query, failure.message));
            }
        };

        Ok(self.shape(user_query, rows))
    }

    /// Review and regenerate until a candidate passes. `None` means every
    /// review failed and the last candidate must not be executed.
    async fn double_check(
        &self,
        user_query: &str,
        mut candidate: String,
    ) -> Result<Option<String>, PipelineFault> {
        for attempt in 1..=MAX_REVIEW_ATTEMPTS {
            let review = self.reviewer.review(user_query, &candidate).await;
            if review.is_correct {
                info!("SQL passed review on attempt {}", attempt);
                return Ok(Some(candidate));
            }

            info!(
                "SQL rejected on review attempt {}/{}: {}",
                attempt, MAX_REVIEW_ATTEMPTS, review.reasoning
            );
            let instruction =
                prompts::regeneration_instruction(user_query, &candidate, &review.reasoning);
            candidate = self
                .generator
                .generate(&instruction)
                .await
                .map_err(|source| PipelineFault {
                    stage: Stage::Reviewing,
                    source,
                })?;
        }

        let review = self.reviewer.review(user_query, &candidate).await;
        if review.is_correct {
            info!("SQL passed the final review");
            Ok(Some(candidate))
        } else {
            warn!("SQL failed the final review: {}", review.reasoning);
            Ok(None)
        }
    }

    async fn execute(&self, sql: &str) -> Result<RowSet, QueryFailure> {
        info!("Executing SQL query: {}", sql);
        let store = Arc::clone(&self.store);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || store.query(&sql))
            .await
            .unwrap_or_else(|e| {
                Err(QueryFailure {
                    message: format!("Query execution was interrupted: {}", e),
                })
            })
    }

    fn shape(&self, user_query: &str, rows: RowSet) -> QueryEnvelope {
        let shaped = shape_rows(rows, self.config.truncation_limit);
        if let Some(ref notice) = shaped.truncated {
            info!("{}", notice);
        }
        match shaped.rows.to_json() {
            Ok(result) => QueryEnvelope::success(user_query, result, shaped.truncated),
            Err(e) => QueryEnvelope::aborted(
                user_query,
                format!("Failed to encode the query result: {}", e),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LanguageModel, LlmRequest, PromptKind};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use polars::prelude::*;
    use serde_json::{json, Value};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<HashMap<PromptKind, VecDeque<Result<Value, LlmError>>>>,
        calls: Mutex<Vec<PromptKind>>,
    }

    impl ScriptedModel {
        fn reply(self, kind: PromptKind, value: Result<Value, LlmError>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .push_back(value);
            self
        }

        fn count(&self, kind: PromptKind) -> usize {
            self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn invoke(&self, request: LlmRequest) -> Result<Value, LlmError> {
            self.calls.lock().unwrap().push(request.kind);
            self.replies
                .lock()
                .unwrap()
                .get_mut(&request.kind)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(LlmError::Http(format!("no {} reply", request.kind))))
        }
    }

    fn store() -> Arc<TabularStore> {
        let df = df! [
            "Doctor" => ["Jane Doe", "Jane Doe", "Matthew Smith"],
            "Age" => [30i64, 40, 50]
        ]
        .unwrap();
        Arc::new(TabularStore::from_frame(&df).unwrap())
    }

    fn agent(model: Arc<ScriptedModel>, config: PipelineConfig) -> QueryAgent {
        let gateway = ModelGateway::new(model, RetryPolicy::immediate(2), Duration::from_secs(5));
        QueryAgent::new(gateway, store(), config).unwrap()
    }

    fn valid() -> Result<Value, LlmError> {
        Ok(json!({"is_valid": true}))
    }

    fn query(sql: &str) -> Result<Value, LlmError> {
        Ok(json!({ "query": sql }))
    }

    fn review(is_correct: bool, reasoning: &str) -> Result<Value, LlmError> {
        Ok(json!({ "reasoning": reasoning, "is_correct": is_correct }))
    }

    #[tokio::test]
    async fn test_validator_fault_rejects_request() {
        let model = Arc::new(ScriptedModel::default());
        let agent = agent(model.clone(), PipelineConfig::default());

        let envelope = agent.run_query_tool("How old is Jane Doe?").await;
        assert!(envelope.error.unwrap().contains("could not be validated"));
        assert_eq!(envelope.result, "[]");
        assert_eq!(model.count(PromptKind::Generation), 0);
    }

    #[tokio::test]
    async fn test_generation_fault_reruns_whole_pipeline() {
        let model = Arc::new(
            ScriptedModel::default()
                .reply(PromptKind::Validation, valid())
                .reply(PromptKind::Generation, Err(LlmError::Http("reset".into())))
                .reply(PromptKind::Generation, Err(LlmError::Http("reset".into())))
                .reply(PromptKind::Validation, valid())
                .reply(PromptKind::Generation, query("SELECT COUNT(*) AS doctor_count FROM df")),
        );
        let agent = agent(model.clone(), PipelineConfig::default());

        let envelope = agent.run_query_tool("How many records?").await;
        assert_eq!(envelope.error, None);
        assert_eq!(envelope.result, r#"[{"doctor_count":3}]"#);
        assert_eq!(model.count(PromptKind::Validation), 2);
        assert_eq!(model.count(PromptKind::Generation), 3);
    }

    #[tokio::test]
    async fn test_generation_faults_exhaust_pipeline_attempts() {
        let mut model = ScriptedModel::default();
        for _ in 0..2 {
            model = model.reply(PromptKind::Validation, valid());
        }
        let model = Arc::new(model);
        let config = PipelineConfig {
            pipeline_attempts: 2,
            ..PipelineConfig::default()
        };
        let agent = agent(model.clone(), config);

        let envelope = agent.run_query_tool("How many records?").await;
        let error = envelope.error.unwrap();
        assert!(error.contains("after 2 attempts"), "{}", error);
        assert!(error.contains("generating"));
        assert_eq!(envelope.result, "[]");
        // two stage attempts per pipeline attempt
        assert_eq!(model.count(PromptKind::Generation), 4);
    }

    #[tokio::test]
    async fn test_review_fault_counts_as_failed_review() {
        let model = Arc::new(
            ScriptedModel::default()
                .reply(PromptKind::Validation, valid())
                .reply(PromptKind::Generation, query("SELECT * FROM df"))
                .reply(PromptKind::Review, Err(LlmError::Timeout(Duration::from_secs(1))))
                .reply(PromptKind::Review, Err(LlmError::Timeout(Duration::from_secs(1))))
                .reply(PromptKind::Generation, query("SELECT Doctor FROM df"))
                .reply(PromptKind::Review, review(true, "ok")),
        );
        let config = PipelineConfig {
            double_check: true,
            ..PipelineConfig::default()
        };
        let agent = agent(model.clone(), config);

        let envelope = agent.run_query_tool("List doctors").await;
        assert_eq!(envelope.error, None);
        assert!(envelope.result.starts_with(r#"[{"Doctor":"#));
        assert_eq!(model.count(PromptKind::Generation), 2);
    }

    #[tokio::test]
    async fn test_final_review_can_still_pass() {
        let model = Arc::new(
            ScriptedModel::default()
                .reply(PromptKind::Validation, valid())
                .reply(PromptKind::Generation, query("SELECT 1 AS a"))
                .reply(PromptKind::Review, review(false, "no"))
                .reply(PromptKind::Generation, query("SELECT 2 AS a"))
                .reply(PromptKind::Review, review(false, "no"))
                .reply(PromptKind::Generation, query("SELECT 3 AS a"))
                .reply(PromptKind::Review, review(false, "no"))
                .reply(PromptKind::Generation, query("SELECT 4 AS a"))
                .reply(PromptKind::Review, review(true, "fine")),
        );
        let config = PipelineConfig {
            double_check: true,
            ..PipelineConfig::default()
        };
        let agent = agent(model.clone(), config);

        let envelope = agent.run_query_tool("q").await;
        assert_eq!(envelope.result, r#"[{"a":4}]"#);
        assert_eq!(model.count(PromptKind::Review), 4);
        assert_eq!(model.count(PromptKind::Generation), 4);
    }

    #[tokio::test]
    async fn test_zero_truncation_limit_is_rejected() {
        let model = Arc::new(ScriptedModel::default());
        let gateway = ModelGateway::new(model, RetryPolicy::none(), Duration::from_secs(5));
        let config = PipelineConfig {
            truncation_limit: 0,
            ..PipelineConfig::default()
        };

        let err = QueryAgent::new(gateway, store(), config).err().unwrap();
        assert!(err.to_string().contains("truncation limit"), "{}", err);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Generating.to_string(), "generating");
        let fault = PipelineFault {
            stage: Stage::Reviewing,
            source: LlmError::Http("down".into()),
        };
        assert_eq!(fault.to_string(), "reviewing failed: LLM API call failed: down");
    }
}
