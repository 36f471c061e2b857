//! Raw-zone batch writes with bounded retry
//!
//! The destination key is generated once per batch and reused across
//! retries, so a retry after a late-failing write cannot duplicate the
//! object. A batch that exhausts its retries is redirected whole to the
//! error sink instead of blocking the main stream.

use crate::buffer::SealedBatch;
use lakeflow_config::IngestConfig;
use lakeflow_core::{encode_ndjson_gz, Record, Zone};
use lakeflow_storage::ZoneStore;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] anyhow::Error),

    #[error("storage failure after diverting to error sink also failed: {0}")]
    SinkUnavailable(#[from] lakeflow_storage::StorageError),
}

/// Outcome of writing one sealed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub key: String,
    pub records: usize,
    pub bytes_written: usize,
    pub attempts: u32,
    /// True when retries exhausted and the batch landed in the error sink
    /// instead of the raw zone.
    pub diverted: bool,
}

#[derive(Clone)]
pub struct BatchWriter {
    store: ZoneStore,
    retries: u32,
    backoff: Duration,
}

impl BatchWriter {
    pub fn new(store: ZoneStore, config: &IngestConfig) -> Self {
        Self {
            store,
            retries: config.flush_retries,
            backoff: config.flush_backoff(),
        }
    }

    /// Write a sealed batch to the raw zone. All records in the batch
    /// become durable together or the whole batch is diverted.
    pub async fn write_batch(&self, batch: &SealedBatch) -> Result<FlushReport, FlushError> {
        let bytes = encode_ndjson_gz(&batch.records)?;
        let key = batch.partition.object_key(Zone::Raw, "ndjson.gz");

        let mut attempts = 0;
        let mut last_error = None;
        while attempts <= self.retries {
            attempts += 1;
            match self.store.put_object(&key, bytes.clone()).await {
                Ok(()) => {
                    metrics::counter!("lakeflow.flush.batches").increment(1);
                    metrics::counter!("lakeflow.flush.records")
                        .increment(batch.records.len() as u64);
                    tracing::info!(
                        key,
                        records = batch.records.len(),
                        bytes = bytes.len(),
                        attempts,
                        "batch flushed to raw zone"
                    );
                    return Ok(FlushReport {
                        key,
                        records: batch.records.len(),
                        bytes_written: bytes.len(),
                        attempts,
                        diverted: false,
                    });
                }
                Err(e) if e.is_transient() && attempts <= self.retries => {
                    tracing::warn!(key, attempt = attempts, error = %e, "flush attempt failed, retrying");
                    tokio::time::sleep(self.backoff * attempts).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        // Retries exhausted or error not retryable: divert the whole
        // batch so it can be reprocessed later.
        metrics::counter!("lakeflow.flush.diverted").increment(1);
        tracing::error!(
            key,
            records = batch.records.len(),
            error = %last_error.expect("loop exit implies an error"),
            "flush retries exhausted, diverting batch to error sink"
        );
        let sink_key = self.store.put_error_sink("failed_flush", bytes).await?;
        Ok(FlushReport {
            key: sink_key,
            records: batch.records.len(),
            bytes_written: 0,
            attempts,
            diverted: true,
        })
    }

    /// Segregate a single malformed record so it never blocks a
    /// well-formed batch and is never dropped silently.
    pub async fn divert_malformed(
        &self,
        record: &Record,
        reason: &str,
    ) -> Result<String, FlushError> {
        let bytes = encode_ndjson_gz(std::slice::from_ref(record))?;
        tracing::warn!(source = record.source, reason, "diverting malformed record");
        Ok(self.store.put_error_sink("malformed", bytes).await?)
    }
}
