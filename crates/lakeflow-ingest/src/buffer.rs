//! Per-partition accumulation and flush triggers
//!
//! The buffer map is the only point where concurrent producers
//! serialize. Sealing a batch moves the accumulator's contents out under
//! the lock and resets the slot; compression and I/O happen elsewhere.

use lakeflow_config::IngestConfig;
use lakeflow_core::{PartitionKey, Record};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Submit rejection. Producers are expected to retry after backpressure;
/// malformed records are handed back so the caller can divert them to
/// the error sink rather than dropping them silently.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("gateway buffers saturated ({buffered} of {limit} bytes)")]
    Backpressure { buffered: usize, limit: usize },

    #[error("malformed record: {reason}")]
    Malformed { reason: String, record: Record },
}

/// An immutable batch sealed for writing. Once flushed successfully every
/// record in it is durable; on failure the whole batch retries as a unit.
#[derive(Debug)]
pub struct SealedBatch {
    pub partition: PartitionKey,
    pub records: Vec<Record>,
    pub bytes: usize,
}

#[derive(Debug)]
struct PartitionBuffer {
    records: Vec<Record>,
    bytes: usize,
    opened_at: Instant,
}

impl PartitionBuffer {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            bytes: 0,
            opened_at: Instant::now(),
        }
    }

    fn push(&mut self, record: Record, approx: usize) {
        self.records.push(record);
        self.bytes += approx;
    }
}

#[derive(Debug)]
struct GatewayState {
    buffers: HashMap<PartitionKey, PartitionBuffer>,
    total_bytes: usize,
}

/// Thread-safe ingestion gateway shared across handlers.
#[derive(Clone)]
pub struct Gateway {
    config: IngestConfig,
    inner: Arc<Mutex<GatewayState>>,
}

impl Gateway {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(GatewayState {
                buffers: HashMap::new(),
                total_bytes: 0,
            })),
        }
    }

    /// Accept one record. Returns the sealed batch if this record tipped
    /// its partition over the byte threshold.
    ///
    /// Never blocks: when the global buffer cap is reached the record is
    /// rejected and the producer must retry.
    pub fn submit(&self, record: Record) -> Result<Option<SealedBatch>, SubmitError> {
        if let Err(reason) = record.validate() {
            metrics::counter!("lakeflow.ingest.malformed").increment(1);
            return Err(SubmitError::Malformed { reason, record });
        }

        let approx = record.approx_bytes();
        let key = PartitionKey::from_timestamp(&record.source, record.timestamp);

        let mut guard = self.inner.lock();
        let prospective = guard.total_bytes.saturating_add(approx);
        if prospective > self.config.max_buffered_bytes {
            metrics::counter!("lakeflow.ingest.rejected").increment(1);
            return Err(SubmitError::Backpressure {
                buffered: guard.total_bytes,
                limit: self.config.max_buffered_bytes,
            });
        }

        let buffer = guard.buffers.entry(key.clone()).or_insert_with(PartitionBuffer::new);
        buffer.push(record, approx);
        let full = buffer.bytes >= self.config.max_batch_bytes;
        guard.total_bytes = prospective;

        metrics::counter!("lakeflow.ingest.accepted").increment(1);

        if full {
            Ok(Some(Self::seal(&mut guard, &key)))
        } else {
            Ok(None)
        }
    }

    /// Seal every buffer whose age crossed the time threshold. Called by
    /// the background flusher on a short cadence; this bounds latency for
    /// slow partitions the way the byte trigger bounds object size for
    /// fast ones.
    pub fn drain_expired(&self) -> Vec<SealedBatch> {
        let max_age = self.config.max_batch_age();
        let mut guard = self.inner.lock();

        let expired: Vec<PartitionKey> = guard
            .buffers
            .iter()
            .filter(|(_, b)| !b.records.is_empty() && b.opened_at.elapsed() >= max_age)
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .map(|key| Self::seal(&mut guard, &key))
            .collect()
    }

    /// Seal everything, regardless of thresholds. Used on shutdown.
    pub fn drain_all(&self) -> Vec<SealedBatch> {
        let mut guard = self.inner.lock();
        let keys: Vec<PartitionKey> = guard.buffers.keys().cloned().collect();
        keys.into_iter()
            .map(|key| Self::seal(&mut guard, &key))
            .collect()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    fn seal(state: &mut GatewayState, key: &PartitionKey) -> SealedBatch {
        let buffer = state
            .buffers
            .remove(key)
            .expect("sealed partition must exist under the lock");
        state.total_bytes = state.total_bytes.saturating_sub(buffer.bytes);

        metrics::counter!("lakeflow.ingest.batches_sealed").increment(1);
        metrics::histogram!("lakeflow.ingest.batch_bytes").record(buffer.bytes as f64);

        SealedBatch {
            partition: key.clone(),
            records: buffer.records,
            bytes: buffer.bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn small_config() -> IngestConfig {
        IngestConfig {
            max_batch_bytes: 256,
            max_batch_age_secs: 60,
            max_buffered_bytes: 1024,
            flush_retries: 1,
            flush_backoff_ms: 1,
        }
    }

    fn record(n: u64) -> Record {
        Record::event("events", Utc::now(), json!({"n": n, "pad": "x".repeat(16)}))
    }

    #[test]
    fn seals_on_byte_threshold() {
        let gateway = Gateway::new(small_config());

        let mut sealed = None;
        for n in 0..32 {
            if let Some(batch) = gateway.submit(record(n)).unwrap() {
                sealed = Some(batch);
                break;
            }
        }

        let batch = sealed.expect("byte threshold should seal a batch");
        assert!(batch.bytes >= 256);
        assert!(!batch.records.is_empty());
        // The slot was reset: sealed bytes are no longer buffered.
        assert!(gateway.buffered_bytes() < 256);
    }

    #[test]
    fn rejects_on_backpressure() {
        let mut config = small_config();
        config.max_batch_bytes = 4096; // never seal
        config.max_buffered_bytes = 4096;
        let gateway = Gateway::new(config);

        let mut rejected = false;
        for n in 0..256 {
            match gateway.submit(record(n)) {
                Ok(_) => {}
                Err(SubmitError::Backpressure { buffered, limit }) => {
                    assert!(buffered <= limit);
                    rejected = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(rejected, "saturated gateway must reject, not block");
    }

    #[test]
    fn malformed_records_are_handed_back() {
        let gateway = Gateway::new(small_config());
        let bad = Record::event("events", Utc::now(), json!("not an object"));
        match gateway.submit(bad) {
            Err(SubmitError::Malformed { record, .. }) => {
                assert_eq!(record.source, "events");
            }
            other => panic!("expected Malformed, got {:?}", other.map(|_| ())),
        }
        // A malformed record never lands in a buffer.
        assert_eq!(gateway.buffered_bytes(), 0);
    }

    #[test]
    fn drain_expired_respects_age() {
        let mut config = small_config();
        config.max_batch_bytes = 1024 * 1024;
        config.max_batch_age_secs = 0; // everything is immediately expired
        let gateway = Gateway::new(config);

        gateway.submit(record(1)).unwrap();
        gateway.submit(record(2)).unwrap();

        let drained = gateway.drain_expired();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].records.len(), 2);
        assert_eq!(gateway.buffered_bytes(), 0);
    }

    #[test]
    fn partitions_buffer_independently() {
        let mut config = small_config();
        config.max_batch_bytes = 1024 * 1024;
        let gateway = Gateway::new(config);

        let early = Record::event(
            "events",
            "2024-01-01T10:00:00Z".parse().unwrap(),
            json!({"a": 1}),
        );
        let late = Record::event(
            "events",
            "2024-01-01T11:00:00Z".parse().unwrap(),
            json!({"a": 2}),
        );
        gateway.submit(early).unwrap();
        gateway.submit(late).unwrap();

        let drained = gateway.drain_all();
        assert_eq!(drained.len(), 2, "hour boundary splits partitions");
    }
}
