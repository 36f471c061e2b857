use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row-change operation tag carried by CDC-sourced records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOp {
    Insert,
    Update,
    Delete,
}

impl CdcOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOp::Insert => "insert",
            CdcOp::Update => "update",
            CdcOp::Delete => "delete",
        }
    }
}

/// A single event or row-change notification. Immutable once emitted.
///
/// `timestamp` is producer-assigned; CDC records additionally carry the
/// operation tag and the extraction (capture) timestamp assigned by the
/// replication worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<CdcOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn event(source: impl Into<String>, timestamp: DateTime<Utc>, payload: Value) -> Self {
        Self {
            source: source.into(),
            timestamp,
            payload,
            op: None,
            extracted_at: None,
        }
    }

    pub fn change(
        table: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Value,
        op: CdcOp,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: table.into(),
            timestamp,
            payload,
            op: Some(op),
            extracted_at: Some(extracted_at),
        }
    }

    /// Basic shape validation applied at the gateway: the payload must be
    /// a non-empty JSON object and the source must be a usable path
    /// segment. Anything else goes to the error sink.
    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("record source is empty".to_string());
        }
        match &self.payload {
            Value::Object(map) if !map.is_empty() => Ok(()),
            Value::Object(_) => Err("payload object is empty".to_string()),
            other => Err(format!(
                "payload must be a JSON object, got {}",
                json_type_name(other)
            )),
        }
    }

    /// Rough in-memory footprint used by the gateway's flush trigger.
    pub fn approx_bytes(&self) -> usize {
        // Serialized length is a good-enough proxy; the buffer stores the
        // parsed value, but the flush threshold guards object size.
        serde_json::to_string(&self.payload)
            .map(|s| s.len())
            .unwrap_or(0)
            + self.source.len()
            + 48
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
