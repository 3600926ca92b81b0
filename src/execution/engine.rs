//! Tabular Store
//!
//! Loads the healthcare dataset once with Polars and materializes it as a
//! single SQLite table in a shared-cache in-memory database. Every query opens
//! its own connection onto that database, so concurrent pipeline invocations
//! never share statement state and never take a lock on the query path.

use crate::error::{NlqError, Result};
use crate::execution::result::RowSet;
use crate::schema::{self, ColumnKind};
use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Days between 0001-01-01 (CE) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Why a query could not be executed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryFailure {
    pub message: String,
}

impl QueryFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for QueryFailure {
    fn from(err: rusqlite::Error) -> Self {
        QueryFailure::new(format!("Query execution failed: {}", err))
    }
}

/// Read-only in-memory table queried with SQLite SQL
pub struct TabularStore {
    uri: String,
    /// Keeps the shared in-memory database alive; not used for queries.
    _owner: Mutex<Connection>,
    columns: Vec<String>,
    row_count: usize,
}

impl TabularStore {
    /// Load the dataset CSV, parsing the admission and discharge dates.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading dataset from {:?}", path);
        if !path.exists() {
            return Err(NlqError::Dataset(format!(
                "Dataset file not found: {}",
                path.display()
            )));
        }

        let df = LazyCsvReader::new(path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()?
            .collect()?;

        let missing = schema::missing_columns(df.get_column_names());
        if !missing.is_empty() {
            return Err(NlqError::Dataset(format!(
                "Dataset is missing columns: {}",
                missing.join(", ")
            )));
        }

        Self::from_frame(&df)
    }

    /// Materialize an already loaded frame as the backing table.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let start = Instant::now();
        let uri = format!(
            "file:nlq_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let mut owner = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        if columns.is_empty() {
            return Err(NlqError::Dataset("Dataset has no columns".to_string()));
        }

        let definitions: Vec<String> = df
            .get_columns()
            .iter()
            .map(|series| {
                format!(
                    "{} {}",
                    quote_ident(series.name()),
                    sql_type_for(series.name(), series.dtype())
                )
            })
            .collect();
        owner.execute(
            &format!(
                "CREATE TABLE {} ({})",
                schema::TABLE_NAME,
                definitions.join(", ")
            ),
            [],
        )?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            schema::TABLE_NAME,
            placeholders
        );
        let tx = owner.transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            let series = df.get_columns();
            let mut record = Vec::with_capacity(series.len());
            for row in 0..df.height() {
                record.clear();
                for s in series {
                    record.push(to_sql_value(s.get(row)?));
                }
                stmt.execute(params_from_iter(record.iter()))?;
            }
        }
        tx.commit()?;

        info!(
            "Materialized table '{}' with {} rows and {} columns in {}ms",
            schema::TABLE_NAME,
            df.height(),
            columns.len(),
            start.elapsed().as_millis()
        );

        Ok(Self {
            uri,
            _owner: Mutex::new(owner),
            columns,
            row_count: df.height(),
        })
    }

    pub fn table_name(&self) -> &'static str {
        schema::TABLE_NAME
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Run `sql` against the table. Every execution error is returned as a
    /// `QueryFailure`; nothing escapes this call.
    pub fn query(&self, sql: &str) -> std::result::Result<RowSet, QueryFailure> {
        let start = Instant::now();
        debug!("Executing SQL: {}", sql);
        if sql.trim().is_empty() {
            return Err(QueryFailure::new("Query execution failed: empty query"));
        }

        let result = self.open_reader().and_then(|conn| run_query(&conn, sql));
        match &result {
            Ok(rows) => info!(
                "Query returned {} rows in {}ms",
                rows.len(),
                start.elapsed().as_millis()
            ),
            Err(e) => warn!("Query failed: {}", e),
        }
        result
    }

    fn open_reader(&self) -> std::result::Result<Connection, QueryFailure> {
        let conn = Connection::open_with_flags(
            &self.uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // The backing table is never written after load.
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }
}

fn run_query(conn: &Connection, sql: &str) -> std::result::Result<RowSet, QueryFailure> {
    let mut stmt = conn.prepare(sql)?;
    let columns = unique_column_names(stmt.column_names().into_iter().map(String::from));
    let width = columns.len();

    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for idx in 0..width {
            record.push(to_json_value(row.get_ref(idx)?));
        }
        records.push(record);
    }
    Ok(RowSet::new(columns, records))
}

/// Repeated result names (`SELECT a.Doctor, b.Doctor ...`) get a numeric
/// suffix, so every column survives as its own JSON key.
fn unique_column_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let names: Vec<String> = names.into_iter().collect();
    let mut taken: HashSet<String> = HashSet::with_capacity(names.len());
    let mut unique = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        if taken.insert(name.clone()) {
            unique.push(name.clone());
            continue;
        }
        let mut n = 2;
        let renamed = loop {
            let candidate = format!("{}_{}", name, n);
            // later original names keep priority over generated ones
            if !names[idx + 1..].contains(&candidate) && taken.insert(candidate.clone()) {
                break candidate;
            }
            n += 1;
        };
        warn!("Duplicate result column {:?} renamed to {:?}", name, renamed);
        unique.push(renamed);
    }
    unique
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema columns use their declared kind; extra columns follow the dtype.
fn sql_type_for(name: &str, dtype: &DataType) -> &'static str {
    if let Some(spec) = schema::column_spec(name) {
        return spec.kind.sql_type();
    }
    let kind = match dtype {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnKind::Integer,
        DataType::Float32 | DataType::Float64 => ColumnKind::Float,
        _ => ColumnKind::Text,
    };
    kind.sql_type()
}

fn to_sql_value(value: AnyValue<'_>) -> SqlValue {
    match value {
        AnyValue::Null => SqlValue::Null,
        AnyValue::Boolean(v) => SqlValue::Integer(i64::from(v)),
        AnyValue::Int8(v) => SqlValue::Integer(v.into()),
        AnyValue::Int16(v) => SqlValue::Integer(v.into()),
        AnyValue::Int32(v) => SqlValue::Integer(v.into()),
        AnyValue::Int64(v) => SqlValue::Integer(v),
        AnyValue::UInt8(v) => SqlValue::Integer(v.into()),
        AnyValue::UInt16(v) => SqlValue::Integer(v.into()),
        AnyValue::UInt32(v) => SqlValue::Integer(v.into()),
        AnyValue::UInt64(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Real(v as f64),
        },
        AnyValue::Float32(v) => SqlValue::Real(v.into()),
        AnyValue::Float64(v) => SqlValue::Real(v),
        AnyValue::String(v) => SqlValue::Text(v.to_string()),
        AnyValue::StringOwned(v) => SqlValue::Text(v.to_string()),
        AnyValue::Date(days) => format_date(days).map_or(SqlValue::Null, SqlValue::Text),
        AnyValue::Datetime(v, unit, _) => {
            format_datetime(v, unit).map_or(SqlValue::Null, SqlValue::Text)
        }
        other => SqlValue::Text(other.to_string()),
    }
}

fn format_date(days: i32) -> Option<String> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
        .map(|d| d.format("%Y-%m-%d 00:00:00").to_string())
}

fn format_datetime(value: i64, unit: TimeUnit) -> Option<String> {
    let millis = match unit {
        TimeUnit::Nanoseconds => value / 1_000_000,
        TimeUnit::Microseconds => value / 1_000,
        TimeUnit::Milliseconds => value,
    };
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
}

fn to_json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
