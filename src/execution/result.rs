//! Query result row-sets
//!
//! Rows are kept positionally and serialized as JSON records whose keys follow
//! the column order of the query, not alphabetical order.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Ordered records sharing one column schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Keep the first `len` rows, in their original order.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// JSON array of records, e.g. `[{"patient_count":12}]`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for RowSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for values in &self.rows {
            seq.serialize_element(&Record {
                columns: &self.columns,
                values,
            })?;
        }
        seq.end()
    }
}

/// A row-set ready for the result envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedResult {
    pub rows: RowSet,
    /// Present only when rows were dropped
    pub truncated: Option<String>,
}

/// Clip `rows` to `limit` records, reporting the clip when it happens.
pub fn shape_rows(mut rows: RowSet, limit: usize) -> ShapedResult {
    let original = rows.len();
    if original <= limit {
        return ShapedResult {
            rows,
            truncated: None,
        };
    }
    rows.truncate(limit);
    ShapedResult {
        rows,
        truncated: Some(format!(
            "Original length is {}, truncated to {}.",
            original, limit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered(n: usize) -> RowSet {
        RowSet::new(
            vec!["id".to_string()],
            (0..n).map(|i| vec![json!(i)]).collect(),
        )
    }

    #[test]
    fn test_json_keeps_column_order() {
        let rows = RowSet::new(
            vec!["Name".to_string(), "Age".to_string(), "Billing_Amount".to_string()],
            vec![vec![json!("Jane Doe"), json!(41), json!(1200.5)]],
        );
        assert_eq!(
            rows.to_json().unwrap(),
            r#"[{"Name":"Jane Doe","Age":41,"Billing_Amount":1200.5}]"#
        );
    }

    #[test]
    fn test_empty_row_set_encodes_as_empty_array() {
        assert_eq!(RowSet::default().to_json().unwrap(), "[]");
    }

    #[test]
    fn test_shape_within_limit_is_untouched() {
        for n in [0, 1, 199, 200] {
            let shaped = shape_rows(numbered(n), 200);
            assert_eq!(shaped.rows.len(), n);
            assert!(shaped.truncated.is_none());
        }
    }

    #[test]
    fn test_shape_over_limit_keeps_prefix() {
        let shaped = shape_rows(numbered(500), 200);
        assert_eq!(shaped.rows.len(), 200);
        assert_eq!(
            shaped.truncated.as_deref(),
            Some("Original length is 500, truncated to 200.")
        );
        for (i, row) in shaped.rows.rows().iter().enumerate() {
            assert_eq!(row[0], json!(i));
        }
    }

    #[test]
    fn test_value_lookup() {
        let rows = numbered(3);
        assert_eq!(rows.value(2, "id"), Some(&json!(2)));
        assert_eq!(rows.value(3, "id"), None);
        assert_eq!(rows.value(0, "missing"), None);
    }
}
