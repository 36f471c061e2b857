//! Raw-zone batch framing: gzip-compressed NDJSON
//!
//! One serialized `Record` per line. Preserves the original payload shape;
//! compression bounds raw-tier storage cost the way the original delivery
//! stream did.

use crate::record::Record;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{BufRead, BufReader, Write};

pub fn encode_ndjson_gz(records: &[Record]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for record in records {
        let line = serde_json::to_vec(record).context("failed to serialize record")?;
        encoder.write_all(&line)?;
        encoder.write_all(b"\n")?;
    }
    encoder.finish().context("failed to finish gzip stream")
}

/// Decode a raw-zone object. Unparseable lines are returned separately so
/// a single bad record never sinks the object; the caller decides whether
/// to count, sample or divert them.
pub fn decode_ndjson_gz(bytes: &[u8]) -> Result<(Vec<Record>, Vec<String>)> {
    let reader = BufReader::new(GzDecoder::new(bytes));
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for line in reader.lines() {
        let line = line.context("failed to read gzip stream")?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(&line) {
            Ok(record) => records.push(record),
            Err(e) => failures.push(format!("{}: {}", e, truncate(&line, 120))),
        }
    }

    Ok((records, failures))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn encode_decode_preserves_records() {
        let records = vec![
            Record::event("events", Utc::now(), json!({"a": 1})),
            Record::event("events", Utc::now(), json!({"b": "two"})),
        ];
        let bytes = encode_ndjson_gz(&records).unwrap();
        let (decoded, failures) = decode_ndjson_gz(&bytes).unwrap();
        assert_eq!(decoded, records);
        assert!(failures.is_empty());
    }

    #[test]
    fn bad_lines_are_isolated() {
        let good = Record::event("events", Utc::now(), json!({"a": 1}));
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(serde_json::to_vec(&good).unwrap().as_slice())
            .unwrap();
        encoder.write_all(b"\nnot json at all\n").unwrap();
        let bytes = encoder.finish().unwrap();

        let (decoded, failures) = decode_ndjson_gz(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(failures.len(), 1);
    }
}
