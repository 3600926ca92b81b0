//! Result envelope returned to the chat orchestrator

use serde::{Deserialize, Serialize};

/// `result` on every failure path
pub const EMPTY_RESULT: &str = "[]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// JSON-encoded row-set
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<String>,
    pub user_query: String,
}

impl QueryEnvelope {
    pub fn success(user_query: &str, result: String, truncated: Option<String>) -> Self {
        Self {
            error: None,
            result,
            truncated,
            user_query: user_query.to_string(),
        }
    }

    pub fn aborted(user_query: &str, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "The request could not be processed.".to_string();
        }
        Self {
            error: Some(error),
            result: EMPTY_RESULT.to_string(),
            truncated: None,
            user_query: user_query.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_omits_optional_fields() {
        let envelope = QueryEnvelope::success("q", r#"[{"n":1}]"#.to_string(), None);
        assert_eq!(
            envelope.to_json().unwrap(),
            r#"{"result":"[{\"n\":1}]","user_query":"q"}"#
        );
    }

    #[test]
    fn test_aborted_defaults_result() {
        let envelope = QueryEnvelope::aborted("q", "");
        assert!(envelope.is_error());
        assert_eq!(envelope.result, EMPTY_RESULT);
        assert!(!envelope.error.unwrap().is_empty());
    }

    #[test]
    fn test_round_trips_tool_payload() {
        let raw = r#"{"error":"mutating operations are not permitted","result":"[]","user_query":"Delete all records for patient X"}"#;
        let envelope: QueryEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.error.as_deref(), Some("mutating operations are not permitted"));
        assert!(envelope.truncated.is_none());
    }
}
