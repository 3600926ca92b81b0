//! Natural-language query agent over a fixed healthcare admissions table.
//!
//! A request is validated, turned into SQL by a language model, optionally
//! reviewed and regenerated, executed against an in-memory SQLite copy of the
//! dataset, and returned as a JSON result envelope.

pub mod agent;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod telemetry;

pub use agent::{QueryAgent, QueryEnvelope};
pub use error::{NlqError, Result};
pub use execution::TabularStore;
