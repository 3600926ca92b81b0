//! NLQ agent: validator, generator, reviewer and the orchestrator that
//! chains them into the query tool.

pub mod envelope;
pub mod generator;
pub mod orchestrator;
pub mod persona;
pub mod reviewer;
pub mod validator;

pub use envelope::{QueryEnvelope, EMPTY_RESULT};
pub use generator::SqlGenerator;
pub use orchestrator::{PipelineFault, QueryAgent, Stage, MAX_REVIEW_ATTEMPTS, NO_CORRECT_QUERY};
pub use persona::{known_doctors, DoctorPersona};
pub use reviewer::{ReviewVerdict, SqlReviewer};
pub use validator::{QueryValidator, ValidationVerdict};
