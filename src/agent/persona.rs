//! Doctor persona for the chat front end
//!
//! The chat user is one of the doctors in the dataset. First-person requests
//! ("How many patients do I have?") only make sense to the query tool once
//! the doctor's name is part of the request.

use crate::error::{NlqError, Result};
use crate::execution::TabularStore;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

const DOCTORS_SQL: &str = "SELECT DISTINCT Doctor FROM df WHERE Doctor IS NOT NULL ORDER BY Doctor";

/// Doctor names present in the store, sorted.
pub fn known_doctors(store: &TabularStore) -> Result<Vec<String>> {
    let rows = store
        .query(DOCTORS_SQL)
        .map_err(|e| NlqError::Dataset(format!("Could not list doctors: {}", e)))?;
    Ok(rows
        .rows()
        .iter()
        .filter_map(|row| match row.first() {
            Some(Value::String(name)) => Some(name.clone()),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct DoctorPersona {
    name: String,
    first_person: Regex,
}

impl DoctorPersona {
    /// Match `name` case-insensitively against the doctors in `store`; the
    /// persona carries the spelling stored in the dataset.
    pub fn resolve(store: &TabularStore, name: &str) -> Result<Self> {
        let wanted = name.trim().to_lowercase();
        let doctors = known_doctors(store)?;
        let name = doctors
            .into_iter()
            .find(|d| d.to_lowercase() == wanted)
            .ok_or_else(|| {
                NlqError::Config(format!("Doctor {:?} is not in the dataset", name.trim()))
            })?;
        Self::new(name)
    }

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let first_person = Regex::new(r"(?i)\b(?:i|me|my|mine|myself)\b")
            .map_err(|e| NlqError::Config(format!("invalid persona pattern: {}", e)))?;
        Ok(Self {
            name: name.into(),
            first_person,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests in the first person are restated for doctor `name`; any other
    /// request is passed through unchanged.
    pub fn personalize(&self, request: &str) -> String {
        if !self.first_person.is_match(request) {
            return request.to_string();
        }
        let rewritten = format!(
            "I am doctor {name}; \"I\", \"me\" and \"my\" refer to doctor {name}. {request}",
            name = self.name,
            request = request.trim()
        );
        debug!("Personalized request: {}", rewritten);
        rewritten
    }
}
