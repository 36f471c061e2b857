// lakeflow-catalog - schema registrar
//
// Periodically (or on demand) scans a zone's objects, infers primitive
// column types and publishes a schema snapshot that fully replaces the
// previous one. There is no incremental merge across refreshes: what the
// latest scan saw is what the catalog knows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod infer;
mod registrar;

pub use infer::{infer_ndjson_columns, infer_parquet_columns};
pub use registrar::{run_refresh_scheduler, SchemaRegistrar};

/// Primitive column types the catalog distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    String,
    Timestamp,
}

impl ColumnType {
    /// Widening within one refresh: integers seen alongside floats become
    /// floats, any other disagreement falls back to string.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Point-in-time schema for a zone. Superseded, not merged, on each
/// refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub zone: lakeflow_core::Zone,
    pub columns: Vec<Column>,
    pub scanned_objects: usize,
    /// Objects whose parse failed and were skipped. A partially-written
    /// or corrupt object never aborts the refresh.
    pub skipped_objects: usize,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("storage error during refresh: {0}")]
    Storage(#[from] lakeflow_storage::StorageError),

    #[error("no snapshot published yet for zone '{zone}'")]
    NoSnapshot { zone: lakeflow_core::Zone },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_rules() {
        use ColumnType::*;
        assert_eq!(Integer.widen(Integer), Integer);
        assert_eq!(Integer.widen(Float), Float);
        assert_eq!(Float.widen(Integer), Float);
        assert_eq!(Boolean.widen(Integer), String);
        assert_eq!(Timestamp.widen(String), String);
    }
}
