// lakeflow-config - unified configuration for the pipeline
//
// Sources, in priority order:
// 1. Environment variables (LAKEFLOW_* prefix)
// 2. Config file path from LAKEFLOW_CONFIG
// 3. Default config file locations (./lakeflow.toml, ./.lakeflow.toml)
// 4. Built-in defaults

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

/// Main runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl RuntimeConfig {
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

/// Ingestion gateway buffering and flush behavior.
///
/// Defaults mirror the delivery-stream hints the platform was tuned for:
/// flush at 1 MiB or 60 seconds, whichever comes first.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    pub max_batch_bytes: usize,
    pub max_batch_age_secs: u64,
    /// Global cap across all partition buffers; submits beyond it are
    /// rejected (backpressure), never blocked.
    pub max_buffered_bytes: usize,
    pub flush_retries: u32,
    pub flush_backoff_ms: u64,
}

impl IngestConfig {
    pub fn max_batch_age(&self) -> Duration {
        Duration::from_secs(self.max_batch_age_secs)
    }

    pub fn flush_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_backoff_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: 1024 * 1024,
            max_batch_age_secs: 60,
            max_buffered_bytes: 64 * 1024 * 1024,
            flush_retries: 3,
            flush_backoff_ms: 250,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub fs: Option<FsConfig>,

    #[serde(default)]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    /// In-memory backend, test harnesses only.
    #[default]
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

/// Schema registrar cadence and sampling.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    pub refresh_interval_secs: u64,
    /// Objects sampled per refresh; a representative subset is enough
    /// for primitive type inference.
    pub sample_objects: usize,
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15 * 60,
            sample_objects: 32,
        }
    }
}

/// Transform engine cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub interval_secs: u64,
    /// Dropped-record samples retained per run report.
    pub error_sample_size: usize,
}

impl TransformConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            error_sample_size: 5,
        }
    }
}

/// Object aging policy: storage class transitions and temp-object GC.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    pub infrequent_access_days: u32,
    pub archive_days: u32,
    /// Interrupted writes linger under the temp prefix; collect them
    /// after this grace period.
    pub temp_grace_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            infrequent_access_days: 90,
            archive_days: 360,
            temp_grace_days: 7,
        }
    }
}

/// Query-layer cost control.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Hard per-query cap; plans over this fail fast.
    pub max_scanned_bytes: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_scanned_bytes: 1_000_000_000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            max_payload_bytes: 8 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.max_batch_bytes, 1024 * 1024);
        assert_eq!(config.ingest.max_batch_age_secs, 60);
        assert_eq!(config.query.max_scanned_bytes, 1_000_000_000);
    }

    #[test]
    fn parses_partial_toml() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [ingest]
            max_batch_bytes = 2048
            max_batch_age_secs = 5
            max_buffered_bytes = 65536
            flush_retries = 1
            flush_backoff_ms = 10

            [storage]
            backend = "fs"

            [storage.fs]
            path = "/tmp/lake"
            "#,
        )
        .unwrap();

        assert_eq!(config.ingest.max_batch_bytes, 2048);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/tmp/lake");
        // Untouched sections keep defaults.
        assert_eq!(config.catalog.refresh_interval_secs, 900);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<RuntimeConfig, _> = toml::from_str("[ingest]\nmax_rowz = 5\n");
        assert!(result.is_err());
    }
}
