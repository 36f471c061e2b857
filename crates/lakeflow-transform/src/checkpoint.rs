//! Transform watermark persistence
//!
//! The checkpoint is the set of raw object paths already rewritten. It is
//! saved after every partition, so a crash mid-run reprocesses only the
//! partitions that had not been committed yet.

use chrono::{DateTime, Utc};
use lakeflow_storage::{Result, ZoneStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformCheckpoint {
    pub version: u32,
    pub processed: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl TransformCheckpoint {
    pub fn empty() -> Self {
        Self {
            version: CURRENT_VERSION,
            processed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.processed.contains(path)
    }

    pub fn mark(&mut self, paths: impl IntoIterator<Item = String>) {
        self.processed.extend(paths);
        self.updated_at = Utc::now();
    }
}

#[derive(Clone)]
pub struct CheckpointStore {
    store: ZoneStore,
}

impl CheckpointStore {
    pub fn new(store: ZoneStore) -> Self {
        Self { store }
    }

    fn key(source: &str) -> String {
        format!("_checkpoints/transform/{}.json", source)
    }

    pub async fn load(&self, source: &str) -> Result<TransformCheckpoint> {
        Ok(self
            .store
            .get_json(&Self::key(source))
            .await?
            .unwrap_or_else(TransformCheckpoint::empty))
    }

    pub async fn save(&self, source: &str, checkpoint: &TransformCheckpoint) -> Result<()> {
        self.store.put_json(&Self::key(source), checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_returns_empty() {
        let checkpoints = CheckpointStore::new(ZoneStore::new_memory());
        let cp = checkpoints.load("events").await.unwrap();
        assert!(cp.processed.is_empty());
        assert_eq!(cp.version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn save_and_reload() {
        let checkpoints = CheckpointStore::new(ZoneStore::new_memory());

        let mut cp = TransformCheckpoint::empty();
        cp.mark(["raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz".to_string()]);
        checkpoints.save("events", &cp).await.unwrap();

        let reloaded = checkpoints.load("events").await.unwrap();
        assert!(reloaded.contains("raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz"));
        assert!(!reloaded.contains("raw/events/other"));
    }
}
