//! Snapshot publication and refresh scheduling
//!
//! One refresh runs per zone at a time: the replace semantics race under
//! concurrent refreshes (last writer wins nondeterministically), so a
//! per-zone async lock serializes them.

use crate::infer::{infer_ndjson_columns, infer_parquet_columns, merge_columns, to_columns};
use crate::{CatalogError, Column, ColumnType, SchemaSnapshot};
use chrono::Utc;
use lakeflow_config::CatalogConfig;
use lakeflow_core::Zone;
use lakeflow_storage::ZoneStore;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct SchemaRegistrar {
    store: ZoneStore,
    sample_objects: usize,
    snapshots: Arc<RwLock<HashMap<Zone, SchemaSnapshot>>>,
    refresh_locks: Arc<HashMap<Zone, Mutex<()>>>,
}

impl SchemaRegistrar {
    pub fn new(store: ZoneStore, config: &CatalogConfig) -> Self {
        let refresh_locks = Zone::all()
            .into_iter()
            .map(|zone| (zone, Mutex::new(())))
            .collect();
        Self {
            store,
            sample_objects: config.sample_objects,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            refresh_locks: Arc::new(refresh_locks),
        }
    }

    /// Scan a zone and publish a fresh snapshot, replacing the previous
    /// one. Concurrent refreshes of the same zone serialize here.
    pub async fn refresh(&self, zone: Zone) -> Result<SchemaSnapshot, CatalogError> {
        let _run_lock = self.refresh_locks[&zone].lock().await;

        let objects = self.store.list(zone, "").await?;
        let sample: Vec<_> = objects.iter().take(self.sample_objects).collect();

        let mut columns: BTreeMap<String, ColumnType> = BTreeMap::new();
        let mut scanned = 0;
        let mut skipped = 0;

        for object in sample {
            let bytes = match self.store.read(&object.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Listed but unreadable: likely deleted or still
                    // settling. Skip it, keep the refresh alive.
                    tracing::warn!(path = object.path, error = %e, "skipping unreadable object");
                    skipped += 1;
                    continue;
                }
            };

            let inferred = if object.path.ends_with(".parquet") {
                infer_parquet_columns(bytes).map(|cols| (cols, 0))
            } else {
                infer_ndjson_columns(&bytes)
            };

            match inferred {
                Ok((object_columns, bad_lines)) => {
                    if bad_lines > 0 {
                        tracing::debug!(path = object.path, bad_lines, "object had unparseable lines");
                    }
                    merge_columns(&mut columns, object_columns);
                    scanned += 1;
                }
                Err(e) => {
                    tracing::warn!(path = object.path, error = %e, "skipping unparseable object");
                    skipped += 1;
                }
            }
        }

        let snapshot = SchemaSnapshot {
            zone,
            columns: to_columns(columns),
            scanned_objects: scanned,
            skipped_objects: skipped,
            taken_at: Utc::now(),
        };

        metrics::counter!("lakeflow.catalog.refreshes").increment(1);
        metrics::counter!("lakeflow.catalog.skipped_objects").increment(skipped as u64);
        tracing::info!(
            zone = %zone,
            columns = snapshot.columns.len(),
            scanned,
            skipped,
            "published schema snapshot"
        );

        self.snapshots.write().insert(zone, snapshot.clone());
        Ok(snapshot)
    }

    /// Current column list for a zone.
    pub fn describe(&self, zone: Zone) -> Result<Vec<Column>, CatalogError> {
        self.snapshots
            .read()
            .get(&zone)
            .map(|s| s.columns.clone())
            .ok_or(CatalogError::NoSnapshot { zone })
    }

    pub fn snapshot(&self, zone: Zone) -> Option<SchemaSnapshot> {
        self.snapshots.read().get(&zone).cloned()
    }
}

/// Fixed-schedule refresh loop for every zone. Spawned by the server;
/// individual refresh failures are logged and the cadence continues.
pub async fn run_refresh_scheduler(registrar: SchemaRegistrar, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for zone in Zone::all() {
            if let Err(e) = registrar.refresh(zone).await {
                tracing::error!(zone = %zone, error = %e, "scheduled catalog refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lakeflow_core::{encode_ndjson_gz, PartitionKey, Record};
    use serde_json::json;

    async fn seed_raw(store: &ZoneStore, payloads: &[serde_json::Value]) {
        let records: Vec<Record> = payloads
            .iter()
            .map(|p| Record::event("events", Utc::now(), p.clone()))
            .collect();
        let key = PartitionKey::from_timestamp("events", records[0].timestamp)
            .object_key(Zone::Raw, "ndjson.gz");
        store
            .put_object(&key, encode_ndjson_gz(&records).unwrap())
            .await
            .unwrap();
    }

    fn registrar(store: ZoneStore) -> SchemaRegistrar {
        SchemaRegistrar::new(store, &CatalogConfig::default())
    }

    #[tokio::test]
    async fn refresh_publishes_and_describe_reads() {
        let store = ZoneStore::new_memory();
        seed_raw(&store, &[json!({"event": "view", "count": 3})]).await;

        let reg = registrar(store);
        assert!(matches!(
            reg.describe(Zone::Raw),
            Err(CatalogError::NoSnapshot { .. })
        ));

        let snapshot = reg.refresh(Zone::Raw).await.unwrap();
        assert_eq!(snapshot.scanned_objects, 1);
        assert_eq!(snapshot.skipped_objects, 0);

        let columns = reg.describe(Zone::Raw).unwrap();
        assert!(columns.iter().any(|c| c.name == "event"));
        assert!(columns.iter().any(|c| c.name == "count"));
    }

    #[tokio::test]
    async fn refresh_is_idempotent_without_writes() {
        let store = ZoneStore::new_memory();
        seed_raw(&store, &[json!({"a": 1}), json!({"a": 2, "b": "x"})]).await;

        let reg = registrar(store);
        let first = reg.refresh(Zone::Raw).await.unwrap();
        let second = reg.refresh(Zone::Raw).await.unwrap();
        assert_eq!(first.columns, second.columns);
        assert_eq!(first.scanned_objects, second.scanned_objects);
    }

    #[tokio::test]
    async fn snapshot_is_replaced_not_merged() {
        let store = ZoneStore::new_memory();
        seed_raw(&store, &[json!({"old_column": 1})]).await;

        let reg = registrar(store.clone());
        reg.refresh(Zone::Raw).await.unwrap();
        assert!(reg
            .describe(Zone::Raw)
            .unwrap()
            .iter()
            .any(|c| c.name == "old_column"));

        // Replace the zone's contents entirely; the next refresh must not
        // remember old_column.
        for obj in store.list(Zone::Raw, "").await.unwrap() {
            store.delete(&obj.path).await.unwrap();
        }
        seed_raw(&store, &[json!({"new_column": "v"})]).await;

        let snapshot = reg.refresh(Zone::Raw).await.unwrap();
        assert!(snapshot.columns.iter().any(|c| c.name == "new_column"));
        assert!(!snapshot.columns.iter().any(|c| c.name == "old_column"));
    }

    #[tokio::test]
    async fn corrupt_object_is_skipped_and_counted() {
        let store = ZoneStore::new_memory();
        seed_raw(&store, &[json!({"good": true})]).await;
        // A half-written parquet object in the processed layout of raw.
        store
            .put_object(
                "raw/events/year=2024/month=01/day=01/hour=00/broken.parquet",
                b"PAR1 but not really".to_vec(),
            )
            .await
            .unwrap();

        let snapshot = registrar(store).refresh(Zone::Raw).await.unwrap();
        assert_eq!(snapshot.scanned_objects, 1);
        assert_eq!(snapshot.skipped_objects, 1);
        assert!(snapshot.columns.iter().any(|c| c.name == "good"));
    }
}
