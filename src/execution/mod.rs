//! Execution Module - the in-memory tabular store and its result types

pub mod engine;
pub mod result;

pub use engine::{QueryFailure, TabularStore};
pub use result::{shape_rows, RowSet, ShapedResult};
