// lakeflow-storage - zone-addressed object store
//
// One OpenDAL operator serves every zone; zone membership is a key
// prefix, not a separate bucket. Writes land under the temp prefix and
// are renamed into place on finalize, so a crashed or cancelled write is
// never visible to a scan.

use chrono::{DateTime, Utc};
use lakeflow_config::{StorageBackend, StorageConfig};
use lakeflow_core::{Zone, ERROR_SINK_PREFIX, TEMP_PREFIX};
use opendal::Operator;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

mod error;
pub mod lifecycle;

pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Listing entry for an object in the lake.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ZoneStore {
    operator: Operator,
}

impl ZoneStore {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let operator = match config.backend {
            StorageBackend::Fs => {
                let fs = config
                    .fs
                    .as_ref()
                    .ok_or_else(|| StorageError::invalid_config("fs config missing"))?;
                let builder = opendal::services::Fs::default().root(&fs.path);
                Operator::new(builder)?.finish()
            }
            StorageBackend::S3 => {
                let s3 = config
                    .s3
                    .as_ref()
                    .ok_or_else(|| StorageError::invalid_config("s3 config missing"))?;
                let mut builder = opendal::services::S3::default()
                    .bucket(&s3.bucket)
                    .region(&s3.region);
                if let Some(endpoint) = &s3.endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(key) = &s3.access_key_id {
                    builder = builder.access_key_id(key);
                }
                if let Some(secret) = &s3.secret_access_key {
                    builder = builder.secret_access_key(secret);
                }
                Operator::new(builder)?.finish()
            }
            StorageBackend::Memory => Self::memory_operator(),
        };

        Ok(Self { operator })
    }

    /// In-memory store for tests and local experiments.
    pub fn new_memory() -> Self {
        Self {
            operator: Self::memory_operator(),
        }
    }

    fn memory_operator() -> Operator {
        let builder = opendal::services::Memory::default();
        Operator::new(builder)
            .expect("memory operator construction is infallible")
            .finish()
    }

    /// Finalized, atomic object write.
    ///
    /// Bytes go to `_tmp/<uuid>` first and are moved to `key` only once
    /// fully written. Readers filtering the temp prefix therefore never
    /// observe a partial object.
    pub async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let staging = format!("{}/{}", TEMP_PREFIX, Uuid::new_v4().simple());
        self.operator.write(&staging, bytes).await?;

        let moved = if self.operator.info().full_capability().rename {
            self.operator.rename(&staging, key).await
        } else {
            // S3-style backends lack rename; copy+delete gives the same
            // visibility guarantee since the final key appears whole.
            match self.operator.copy(&staging, key).await {
                Ok(()) => self.operator.delete(&staging).await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = moved {
            tracing::warn!(key, staging, error = %e, "failed to finalize object");
            return Err(e.into());
        }

        tracing::debug!(key, "object finalized");
        Ok(())
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        match self.operator.read(key).await {
            Ok(buf) => Ok(buf.to_vec()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(StorageError::NotFound { key: key.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.operator.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.operator.delete(key).await?;
        Ok(())
    }

    /// List finalized objects under a zone-scoped prefix, excluding
    /// in-flight temp objects and the error sink.
    pub async fn list(&self, zone: Zone, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let full_prefix = if prefix.is_empty() {
            format!("{}/", zone.as_str())
        } else {
            format!("{}/{}/", zone.as_str(), prefix.trim_matches('/'))
        };
        self.list_raw(&full_prefix).await
    }

    /// List any prefix without zone scoping. Temp and error-sink objects
    /// are still excluded; use `list_temp` to see in-flight objects.
    pub async fn list_raw(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let entries = self
            .operator
            .list_with(prefix)
            .recursive(true)
            .await?;

        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.path().to_string();
            if path.ends_with('/') {
                continue;
            }
            if path.contains(&format!("{}/", TEMP_PREFIX))
                || path.contains(&format!("{}/", ERROR_SINK_PREFIX))
            {
                continue;
            }
            let meta = self.operator.stat(&path).await?;
            objects.push(ObjectMeta {
                path,
                size: meta.content_length(),
                last_modified: meta.last_modified(),
            });
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    /// List in-flight objects under the temp prefix (for GC).
    pub async fn list_temp(&self) -> Result<Vec<ObjectMeta>> {
        let entries = self
            .operator
            .list_with(&format!("{}/", TEMP_PREFIX))
            .recursive(true)
            .await?;

        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.path().to_string();
            if path.ends_with('/') {
                continue;
            }
            let meta = self.operator.stat(&path).await?;
            objects.push(ObjectMeta {
                path,
                size: meta.content_length(),
                last_modified: meta.last_modified(),
            });
        }
        Ok(objects)
    }

    /// Divert a payload to the error sink under a distinguishing category
    /// prefix. Returns the sink key.
    pub async fn put_error_sink(&self, category: &str, bytes: Vec<u8>) -> Result<String> {
        let key = format!(
            "{}/{}/{}-{}.ndjson.gz",
            ERROR_SINK_PREFIX,
            category,
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        // Sink writes skip the temp/rename dance: they are terminal and
        // nothing scans the sink for correctness.
        self.operator.write(&key, bytes).await?;
        tracing::warn!(key, category, "payload diverted to error sink");
        Ok(key)
    }

    pub async fn list_error_sink(&self, category: &str) -> Result<Vec<ObjectMeta>> {
        let prefix = format!("{}/{}/", ERROR_SINK_PREFIX, category);
        let entries = self.operator.list_with(&prefix).recursive(true).await?;
        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.path().to_string();
            if path.ends_with('/') {
                continue;
            }
            let meta = self.operator.stat(&path).await?;
            objects.push(ObjectMeta {
                path,
                size: meta.content_length(),
                last_modified: meta.last_modified(),
            });
        }
        Ok(objects)
    }

    /// Small-state helper: persist a JSON document (checkpoints, CDC task
    /// state). Overwrites in place; state keys live outside zone prefixes.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::invalid_config(format!("serialize {}: {}", key, e)))?;
        self.operator.write(key, bytes).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.operator.read(key).await {
            Ok(buf) => {
                let value = serde_json::from_slice(&buf.to_vec()).map_err(|e| {
                    StorageError::invalid_config(format!("corrupt state at {}: {}", key, e))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[tokio::test]
    async fn put_and_read_round_trip() {
        let store = ZoneStore::new_memory();
        store
            .put_object("raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz", b"data".to_vec())
            .await
            .unwrap();

        let bytes = store
            .read("raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz")
            .await
            .unwrap();
        assert_eq!(bytes, b"data");
    }

    #[tokio::test]
    async fn listing_excludes_temp_and_sink() {
        let store = ZoneStore::new_memory();
        store
            .put_object("raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz", b"x".to_vec())
            .await
            .unwrap();
        store.put_error_sink("malformed", b"bad".to_vec()).await.unwrap();
        // Simulate an interrupted write left under the temp prefix.
        store
            .operator
            .write("_tmp/deadbeef", b"partial".to_vec())
            .await
            .unwrap();

        let listed = store.list(Zone::Raw, "events").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].path.ends_with("a.ndjson.gz"));

        let temp = store.list_temp().await.unwrap();
        assert_eq!(temp.len(), 1);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = ZoneStore::new_memory();
        match store.read("raw/nope").await {
            Err(StorageError::NotFound { key }) => assert_eq!(key, "raw/nope"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn json_state_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct State {
            position: u64,
        }

        let store = ZoneStore::new_memory();
        assert_eq!(store.get_json::<State>("_cdc/orders.json").await.unwrap(), None);

        store
            .put_json("_cdc/orders.json", &State { position: 42 })
            .await
            .unwrap();
        assert_eq!(
            store.get_json::<State>("_cdc/orders.json").await.unwrap(),
            Some(State { position: 42 })
        );
    }
}
