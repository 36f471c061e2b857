//! Arrow encoding and Parquet writing for the processed/curated zones
//!
//! Schema is inferred per batch from the normalized payloads: fixed
//! pipeline columns first (`timestamp`, and for CDC `op`/`extracted_at`),
//! then payload columns in name order. Type widening within a batch is
//! Int64 -> Float64, anything else mixed -> Utf8.

use crate::record::Record;
use anyhow::{bail, Context, Result};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

const TIMESTAMP_COLUMN: &str = "timestamp";
const OP_COLUMN: &str = "op";
const EXTRACTED_AT_COLUMN: &str = "extracted_at";

/// Shared writer properties (cached).
///
/// Dictionary encoding, page statistics and ZSTD keep processed objects
/// small and friendly to scan pruning.
pub fn writer_properties() -> &'static WriterProperties {
    static PROPERTIES: OnceLock<WriterProperties> = OnceLock::new();
    PROPERTIES.get_or_init(|| {
        WriterProperties::builder()
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_compression(Compression::ZSTD(
                ZstdLevel::try_new(2).unwrap_or_default(),
            ))
            .set_data_page_size_limit(256 * 1024)
            .set_max_row_group_size(32 * 1024)
            .build()
    })
}

/// Infer the Arrow schema for a set of normalized records.
pub fn infer_arrow_schema(records: &[Record]) -> SchemaRef {
    let has_cdc = records.iter().any(|r| r.op.is_some());

    let mut payload_types: BTreeMap<String, DataType> = BTreeMap::new();
    for record in records {
        if let Value::Object(map) = &record.payload {
            for (key, value) in map {
                let ty = json_data_type(value);
                payload_types
                    .entry(key.clone())
                    .and_modify(|existing| *existing = widen(existing, &ty))
                    .or_insert(ty);
            }
        }
    }

    let mut fields = vec![Field::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Microsecond, None),
        false,
    )];
    if has_cdc {
        fields.push(Field::new(OP_COLUMN, DataType::Utf8, true));
        fields.push(Field::new(
            EXTRACTED_AT_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        ));
    }
    for (name, ty) in payload_types {
        fields.push(Field::new(name, ty, true));
    }

    Arc::new(Schema::new(fields))
}

fn json_data_type(value: &Value) -> DataType {
    match value {
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => DataType::Int64,
        Value::Number(_) => DataType::Float64,
        // Null contributes nothing; keep it widest-compatible.
        Value::Null => DataType::Int64,
        _ => DataType::Utf8,
    }
}

fn widen(a: &DataType, b: &DataType) -> DataType {
    use DataType::*;
    match (a, b) {
        (x, y) if x == y => x.clone(),
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => Utf8,
    }
}

/// Build a RecordBatch from records using an inferred schema.
pub fn records_to_batch(records: &[Record]) -> Result<RecordBatch> {
    if records.is_empty() {
        bail!("cannot build a batch from zero records");
    }

    let schema = infer_arrow_schema(records);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let array: ArrayRef = match field.name().as_str() {
            TIMESTAMP_COLUMN => {
                let mut builder = TimestampMicrosecondBuilder::with_capacity(records.len());
                for record in records {
                    builder.append_value(record.timestamp.timestamp_micros());
                }
                Arc::new(builder.finish())
            }
            OP_COLUMN => {
                let mut builder = StringBuilder::new();
                for record in records {
                    match record.op {
                        Some(op) => builder.append_value(op.as_str()),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            EXTRACTED_AT_COLUMN => {
                let mut builder = TimestampMicrosecondBuilder::with_capacity(records.len());
                for record in records {
                    match record.extracted_at {
                        Some(ts) => builder.append_value(ts.timestamp_micros()),
                        None => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            payload_key => build_payload_column(records, payload_key, field.data_type())?,
        };
        columns.push(array);
    }

    RecordBatch::try_new(schema, columns).context("failed to assemble record batch")
}

fn build_payload_column(records: &[Record], key: &str, ty: &DataType) -> Result<ArrayRef> {
    let values = records.iter().map(|r| match &r.payload {
        Value::Object(map) => map.get(key),
        _ => None,
    });

    let array: ArrayRef = match ty {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for v in values {
                match v {
                    Some(Value::Bool(b)) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for v in values {
                match v.and_then(Value::as_i64) {
                    Some(i) => builder.append_value(i),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for v in values {
                match v.and_then(Value::as_f64) {
                    Some(f) => builder.append_value(f),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for v in values {
                match v {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
        other => bail!("unsupported payload column type {:?} for '{}'", other, key),
    };

    Ok(array)
}

/// Write a RecordBatch into an in-memory Parquet buffer.
pub fn write_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let props = writer_properties().clone();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .context("failed to create parquet writer")?;
    writer.write(batch).context("failed to write record batch")?;
    writer.close().context("failed to close parquet writer")?;
    Ok(buffer)
}
