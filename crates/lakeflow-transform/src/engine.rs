//! The transform run itself
//!
//! Work unit is a partition, not a record: all pending raw objects of one
//! partition are decoded, normalized and rewritten as a single Parquet
//! object. Partitions are independent; ordering matters only within one,
//! by arrival order of the raw objects.

use crate::checkpoint::{CheckpointStore, TransformCheckpoint};
use lakeflow_config::TransformConfig;
use lakeflow_core::{
    decode_ndjson_gz, normalize_payload, records_to_batch, write_parquet, ContentHash,
    PartitionKey, Record, Zone,
};
use lakeflow_storage::{ObjectMeta, ZoneStore};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("storage error: {0}")]
    Storage(#[from] lakeflow_storage::StorageError),

    #[error("encoding error for partition '{partition}': {source}")]
    Encoding {
        partition: String,
        source: anyhow::Error,
    },
}

/// Outcome of one transform run, including the dropped-record
/// observability the pipeline promises operators.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub objects_seen: usize,
    pub objects_transformed: usize,
    pub partitions_written: Vec<String>,
    pub records_out: usize,
    pub records_dropped: usize,
    pub drop_samples: Vec<String>,
}

#[derive(Clone)]
pub struct TransformEngine {
    store: ZoneStore,
    checkpoints: CheckpointStore,
    error_sample_size: usize,
}

impl TransformEngine {
    pub fn new(store: ZoneStore, config: &TransformConfig) -> Self {
        Self {
            checkpoints: CheckpointStore::new(store.clone()),
            store,
            error_sample_size: config.error_sample_size,
        }
    }

    /// Transform every raw object of `source` not yet in the checkpoint.
    /// Restartable: the checkpoint is committed per partition, and output
    /// keys are content-addressed, so a rerun after a crash neither skips
    /// nor duplicates data.
    pub async fn run(&self, source: &str) -> Result<TransformReport, TransformError> {
        let mut checkpoint = self.checkpoints.load(source).await?;
        let objects = self.store.list(Zone::Raw, source).await?;

        let mut report = TransformReport {
            objects_seen: objects.len(),
            ..TransformReport::default()
        };

        let pending: Vec<ObjectMeta> = objects
            .into_iter()
            .filter(|o| !checkpoint.contains(&o.path))
            .collect();

        if pending.is_empty() {
            tracing::debug!(source, "transform run found nothing pending");
            return Ok(report);
        }

        // Group pending objects by partition directory.
        let mut partitions: BTreeMap<String, Vec<ObjectMeta>> = BTreeMap::new();
        for object in pending {
            let prefix = match object.path.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => continue,
            };
            partitions.entry(prefix).or_default().push(object);
        }

        for (partition_dir, objects) in partitions {
            self.transform_partition(source, &partition_dir, &objects, &mut report)
                .await?;

            // Commit progress before moving to the next partition.
            checkpoint.mark(objects.into_iter().map(|o| o.path));
            self.checkpoints.save(source, &checkpoint).await?;
        }

        metrics::counter!("lakeflow.transform.records_out").increment(report.records_out as u64);
        metrics::counter!("lakeflow.transform.records_dropped")
            .increment(report.records_dropped as u64);
        tracing::info!(
            source,
            partitions = report.partitions_written.len(),
            records_out = report.records_out,
            records_dropped = report.records_dropped,
            "transform run complete"
        );

        Ok(report)
    }

    async fn transform_partition(
        &self,
        source: &str,
        partition_dir: &str,
        objects: &[ObjectMeta],
        report: &mut TransformReport,
    ) -> Result<(), TransformError> {
        let mut records: Vec<Record> = Vec::new();

        for object in objects {
            let bytes = self.store.read(&object.path).await?;
            let (decoded, failures) = match decode_ndjson_gz(&bytes) {
                Ok(result) => result,
                Err(e) => {
                    // Whole object undecodable: drop it from this run but
                    // keep the partition going.
                    tracing::warn!(path = object.path, error = %e, "skipping undecodable raw object");
                    report.records_dropped += 1;
                    if report.drop_samples.len() < self.error_sample_size {
                        report.drop_samples.push(format!("{}: {}", object.path, e));
                    }
                    continue;
                }
            };

            report.records_dropped += failures.len();
            for failure in failures {
                if report.drop_samples.len() < self.error_sample_size {
                    report.drop_samples.push(failure);
                }
            }

            records.extend(decoded.into_iter().map(|mut record| {
                record.payload = normalize_payload(&record.payload);
                record
            }));
            report.objects_transformed += 1;
        }

        if records.is_empty() {
            tracing::debug!(partition_dir, "no usable records in partition");
            return Ok(());
        }

        let batch = records_to_batch(&records).map_err(|e| TransformError::Encoding {
            partition: partition_dir.to_string(),
            source: e,
        })?;
        let parquet = write_parquet(&batch).map_err(|e| TransformError::Encoding {
            partition: partition_dir.to_string(),
            source: e,
        })?;

        // Content-addressed filename: reprocessing identical input maps
        // to the identical key.
        let filename = format!("part-{}.parquet", ContentHash::of(&parquet).short_hex());
        let key = PartitionKey::from_timestamp(source, records[0].timestamp)
            .object_key_named(Zone::Processed, &filename);

        self.store.put_object(&key, parquet).await?;

        report.records_out += records.len();
        report.partitions_written.push(key);
        Ok(())
    }
}
