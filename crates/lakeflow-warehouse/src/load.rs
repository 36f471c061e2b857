//! All-or-nothing bulk load into warehouse datasets
//!
//! A load copies every object of a source into a fresh load directory,
//! then commits by replacing the dataset manifest in one write. Readers
//! go through the manifest, so data without a manifest entry does not
//! exist as far as the warehouse is concerned. A failure mid-load leaves
//! the manifest untouched and cleans up the partial copy.

use chrono::{DateTime, Utc};
use lakeflow_core::Zone;
use lakeflow_storage::{StorageError, ZoneStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const WAREHOUSE_PREFIX: &str = "_warehouse";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("nothing to load: zone '{zone}' has no objects for '{source_name}'")]
    EmptySource { zone: Zone, source_name: String },

    /// The load failed partway. No data was committed; the previous
    /// manifest, if any, is still in effect.
    #[error("bulk load aborted, nothing committed: {source}")]
    Aborted {
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedObject {
    pub path: String,
    pub size: u64,
}

/// Commit record for a dataset. Replaced wholesale on every successful
/// load; the previous load's data is deleted after the new manifest is
/// durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadManifest {
    pub dataset: String,
    pub load_id: String,
    pub source_zone: Zone,
    pub source: String,
    pub objects: Vec<LoadedObject>,
    pub bytes: u64,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub dataset: String,
    pub load_id: String,
    pub objects: usize,
    pub bytes: u64,
}

pub struct BulkLoader {
    store: ZoneStore,
}

impl BulkLoader {
    pub fn new(store: ZoneStore) -> Self {
        Self { store }
    }

    /// Load every object of `source` in `zone` into `dataset`.
    pub async fn load(
        &self,
        zone: Zone,
        source: &str,
        dataset: &str,
    ) -> Result<LoadReport, LoadError> {
        let objects = self.store.list(zone, source).await?;
        if objects.is_empty() {
            return Err(LoadError::EmptySource {
                zone,
                source_name: source.to_string(),
            });
        }

        let previous = self.manifest(dataset).await?;
        let load_id = Uuid::new_v4().simple().to_string();
        let mut loaded = Vec::with_capacity(objects.len());
        let mut bytes = 0u64;

        for object in &objects {
            let target = format!("{}/{}/{}/{}", WAREHOUSE_PREFIX, dataset, load_id, object.path);
            match self.copy_object(&object.path, &target).await {
                Ok(size) => {
                    bytes += size;
                    loaded.push(LoadedObject {
                        path: target,
                        size,
                    });
                }
                Err(e) => {
                    self.abort(&loaded).await;
                    metrics::counter!("lakeflow.warehouse.aborted_loads").increment(1);
                    tracing::warn!(
                        dataset,
                        failed_object = object.path,
                        error = %e,
                        "bulk load aborted"
                    );
                    return Err(LoadError::Aborted { source: e });
                }
            }
        }

        let manifest = LoadManifest {
            dataset: dataset.to_string(),
            load_id: load_id.clone(),
            source_zone: zone,
            source: source.to_string(),
            objects: loaded,
            bytes,
            loaded_at: Utc::now(),
        };

        // The commit point: one staged write replacing the manifest.
        let serialized = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StorageError::invalid_config(format!("serialize manifest: {}", e)))?;
        self.store
            .put_object(&Self::manifest_key(dataset), serialized)
            .await?;

        // The superseded load is unreachable once the manifest points
        // elsewhere; removal is best effort.
        if let Some(previous) = previous {
            for object in &previous.objects {
                if let Err(e) = self.store.delete(&object.path).await {
                    tracing::warn!(path = object.path, error = %e, "stale load object not removed");
                }
            }
        }

        metrics::counter!("lakeflow.warehouse.loads").increment(1);
        tracing::info!(
            dataset,
            load_id,
            objects = manifest.objects.len(),
            bytes,
            "bulk load committed"
        );

        Ok(LoadReport {
            dataset: dataset.to_string(),
            load_id,
            objects: manifest.objects.len(),
            bytes,
        })
    }

    /// The committed manifest for a dataset, if any load ever succeeded.
    pub async fn manifest(&self, dataset: &str) -> Result<Option<LoadManifest>, LoadError> {
        Ok(self
            .store
            .get_json::<LoadManifest>(&Self::manifest_key(dataset))
            .await?)
    }

    /// Paths a reader of this dataset should scan: exactly the committed
    /// manifest's objects, never loose files under the dataset prefix.
    pub async fn committed_objects(&self, dataset: &str) -> Result<Vec<LoadedObject>, LoadError> {
        Ok(self
            .manifest(dataset)
            .await?
            .map(|m| m.objects)
            .unwrap_or_default())
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<u64, StorageError> {
        let bytes = self.store.read(from).await?;
        let size = bytes.len() as u64;
        self.store.put_object(to, bytes).await?;
        Ok(size)
    }

    async fn abort(&self, written: &[LoadedObject]) {
        for object in written {
            if let Err(e) = self.store.delete(&object.path).await {
                tracing::warn!(path = object.path, error = %e, "partial load object not removed");
            }
        }
    }

    fn manifest_key(dataset: &str) -> String {
        format!("{}/{}/manifest.json", WAREHOUSE_PREFIX, dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lakeflow_core::{records_to_batch, write_parquet, PartitionKey, Record};
    use serde_json::json;

    async fn seed(store: &ZoneStore, source: &str, hours: &[&str]) {
        for hour in hours {
            let ts: DateTime<Utc> = hour.parse().unwrap();
            let records = vec![Record::event(source, ts, json!({"v": 1}))];
            let batch = records_to_batch(&records).unwrap();
            let key =
                PartitionKey::from_timestamp(source, ts).object_key(Zone::Processed, "parquet");
            store
                .put_object(&key, write_parquet(&batch).unwrap())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn load_commits_manifest_covering_every_object() {
        let store = ZoneStore::new_memory();
        seed(&store, "events", &["2024-05-01T10:00:00Z", "2024-05-01T11:00:00Z"]).await;

        let loader = BulkLoader::new(store.clone());
        assert!(loader.manifest("events_wh").await.unwrap().is_none());

        let report = loader
            .load(Zone::Processed, "events", "events_wh")
            .await
            .unwrap();
        assert_eq!(report.objects, 2);
        assert!(report.bytes > 0);

        let manifest = loader.manifest("events_wh").await.unwrap().unwrap();
        assert_eq!(manifest.objects.len(), 2);
        assert_eq!(manifest.load_id, report.load_id);
        for object in &manifest.objects {
            assert!(store.exists(&object.path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn empty_source_commits_nothing() {
        let loader = BulkLoader::new(ZoneStore::new_memory());
        let err = loader
            .load(Zone::Processed, "nothing_here", "wh")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::EmptySource { .. }));
        assert!(loader.manifest("wh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reload_replaces_previous_load() {
        let store = ZoneStore::new_memory();
        seed(&store, "events", &["2024-05-01T10:00:00Z"]).await;

        let loader = BulkLoader::new(store.clone());
        let first = loader
            .load(Zone::Processed, "events", "events_wh")
            .await
            .unwrap();
        let first_objects = loader.committed_objects("events_wh").await.unwrap();

        seed(&store, "events", &["2024-05-01T11:00:00Z"]).await;
        let second = loader
            .load(Zone::Processed, "events", "events_wh")
            .await
            .unwrap();
        assert_ne!(first.load_id, second.load_id);
        assert_eq!(second.objects, 2);

        // Old load is unreachable and deleted.
        for object in &first_objects {
            assert!(!store.exists(&object.path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn uncommitted_files_are_invisible_to_readers() {
        let store = ZoneStore::new_memory();
        // A crashed load: data landed, manifest never written.
        store
            .put_object(
                "_warehouse/events_wh/deadbeef/processed/events/year=2024/month=05/day=01/hour=10/orphan.parquet",
                vec![1, 2, 3],
            )
            .await
            .unwrap();

        let loader = BulkLoader::new(store);
        assert!(loader
            .committed_objects("events_wh")
            .await
            .unwrap()
            .is_empty());
    }
}
