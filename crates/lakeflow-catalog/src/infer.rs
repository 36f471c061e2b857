//! Column type inference from sampled objects
//!
//! Raw-zone objects are NDJSON-framed records: columns come from payload
//! keys. Processed/curated objects are Parquet: the footer already
//! carries the schema, no row scan needed.

use crate::{Column, ColumnType};
use anyhow::{Context, Result};
use lakeflow_core::decode_ndjson_gz;
use parquet::basic::{LogicalType, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::Value;
use std::collections::BTreeMap;

/// Infer columns from a raw-zone NDJSON object. Returns the column map
/// plus the number of record lines that failed to parse.
pub fn infer_ndjson_columns(bytes: &[u8]) -> Result<(Vec<Column>, usize)> {
    let (records, failures) = decode_ndjson_gz(bytes).context("undecodable ndjson object")?;

    let mut columns: BTreeMap<String, ColumnType> = BTreeMap::new();
    columns.insert("timestamp".to_string(), ColumnType::Timestamp);

    for record in &records {
        if let Value::Object(map) = &record.payload {
            for (key, value) in map {
                if let Some(ty) = json_column_type(value) {
                    columns
                        .entry(key.clone())
                        .and_modify(|existing| *existing = existing.widen(ty))
                        .or_insert(ty);
                }
            }
        }
        if record.op.is_some() {
            columns.insert("op".to_string(), ColumnType::String);
            columns.insert("extracted_at".to_string(), ColumnType::Timestamp);
        }
    }

    Ok((to_columns(columns), failures.len()))
}

/// Read columns out of a Parquet footer.
pub fn infer_parquet_columns(bytes: Vec<u8>) -> Result<Vec<Column>> {
    let reader = SerializedFileReader::new(bytes::Bytes::from(bytes))
        .context("unreadable parquet footer")?;
    let schema = reader.metadata().file_metadata().schema_descr();

    let mut columns = Vec::with_capacity(schema.num_columns());
    for i in 0..schema.num_columns() {
        let descr = schema.column(i);
        let ty = match descr.physical_type() {
            PhysicalType::BOOLEAN => ColumnType::Boolean,
            PhysicalType::INT32 | PhysicalType::INT64 => {
                if matches!(descr.logical_type(), Some(LogicalType::Timestamp { .. })) {
                    ColumnType::Timestamp
                } else {
                    ColumnType::Integer
                }
            }
            PhysicalType::FLOAT | PhysicalType::DOUBLE => ColumnType::Float,
            _ => ColumnType::String,
        };
        columns.push(Column {
            name: descr.name().to_string(),
            column_type: ty,
        });
    }

    Ok(columns)
}

/// Merge one object's columns into the refresh-wide accumulator.
pub(crate) fn merge_columns(acc: &mut BTreeMap<String, ColumnType>, columns: Vec<Column>) {
    for column in columns {
        acc.entry(column.name)
            .and_modify(|existing| *existing = existing.widen(column.column_type))
            .or_insert(column.column_type);
    }
}

pub(crate) fn to_columns(map: BTreeMap<String, ColumnType>) -> Vec<Column> {
    map.into_iter()
        .map(|(name, column_type)| Column { name, column_type })
        .collect()
}

fn json_column_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
        Value::Number(_) => Some(ColumnType::Float),
        Value::String(_) | Value::Array(_) | Value::Object(_) => Some(ColumnType::String),
        // Nulls carry no type information.
        Value::Null => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lakeflow_core::{encode_ndjson_gz, records_to_batch, write_parquet, Record};
    use serde_json::json;

    #[test]
    fn ndjson_inference_widens_across_records() {
        let records = vec![
            Record::event("events", Utc::now(), json!({"value": 1, "name": "a"})),
            Record::event("events", Utc::now(), json!({"value": 2.5, "flag": true})),
        ];
        let bytes = encode_ndjson_gz(&records).unwrap();

        let (columns, skipped) = infer_ndjson_columns(&bytes).unwrap();
        assert_eq!(skipped, 0);

        let by_name: std::collections::HashMap<_, _> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.column_type))
            .collect();
        assert_eq!(by_name["timestamp"], ColumnType::Timestamp);
        assert_eq!(by_name["value"], ColumnType::Float);
        assert_eq!(by_name["name"], ColumnType::String);
        assert_eq!(by_name["flag"], ColumnType::Boolean);
    }

    #[test]
    fn parquet_inference_reads_the_footer() {
        let records = vec![Record::event(
            "events",
            Utc::now(),
            json!({"n": 7, "label": "x", "ratio": 0.5}),
        )];
        let parquet = write_parquet(&records_to_batch(&records).unwrap()).unwrap();

        let columns = infer_parquet_columns(parquet).unwrap();
        let by_name: std::collections::HashMap<_, _> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.column_type))
            .collect();
        assert_eq!(by_name["timestamp"], ColumnType::Timestamp);
        assert_eq!(by_name["n"], ColumnType::Integer);
        assert_eq!(by_name["ratio"], ColumnType::Float);
        assert_eq!(by_name["label"], ColumnType::String);
    }

    #[test]
    fn garbage_parquet_is_an_error_not_a_panic() {
        assert!(infer_parquet_columns(b"not parquet".to_vec()).is_err());
    }
}
