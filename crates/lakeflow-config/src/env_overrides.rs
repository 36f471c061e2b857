// Environment variable overrides, applied after file config.
//
// Variables use the LAKEFLOW_ prefix with section and key joined by
// underscores, e.g. LAKEFLOW_INGEST_MAX_BATCH_BYTES=2097152.

use crate::{RuntimeConfig, StorageBackend};
use anyhow::{Context, Result};

pub const ENV_PREFIX: &str = "LAKEFLOW_";

/// Source of environment values, injectable for tests.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

pub fn apply_env_overrides(config: &mut RuntimeConfig, env: &dyn EnvSource) -> Result<()> {
    override_usize(env, "INGEST_MAX_BATCH_BYTES", &mut config.ingest.max_batch_bytes)?;
    override_u64(env, "INGEST_MAX_BATCH_AGE_SECS", &mut config.ingest.max_batch_age_secs)?;
    override_usize(env, "INGEST_MAX_BUFFERED_BYTES", &mut config.ingest.max_buffered_bytes)?;
    override_u32(env, "INGEST_FLUSH_RETRIES", &mut config.ingest.flush_retries)?;
    override_u64(env, "INGEST_FLUSH_BACKOFF_MS", &mut config.ingest.flush_backoff_ms)?;

    if let Some(value) = env.get(&format!("{}STORAGE_BACKEND", ENV_PREFIX)) {
        config.storage.backend = match value.as_str() {
            "fs" => StorageBackend::Fs,
            "s3" => StorageBackend::S3,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("invalid LAKEFLOW_STORAGE_BACKEND: '{}'", other),
        };
    }
    if let Some(path) = env.get(&format!("{}STORAGE_FS_PATH", ENV_PREFIX)) {
        config.storage.fs = Some(crate::FsConfig { path });
    }
    if let Some(bucket) = env.get(&format!("{}STORAGE_S3_BUCKET", ENV_PREFIX)) {
        let region = env
            .get(&format!("{}STORAGE_S3_REGION", ENV_PREFIX))
            .unwrap_or_else(|| "us-east-1".to_string());
        config.storage.s3 = Some(crate::S3Config {
            bucket,
            region,
            endpoint: env.get(&format!("{}STORAGE_S3_ENDPOINT", ENV_PREFIX)),
            access_key_id: env.get(&format!("{}STORAGE_S3_ACCESS_KEY_ID", ENV_PREFIX)),
            secret_access_key: env.get(&format!("{}STORAGE_S3_SECRET_ACCESS_KEY", ENV_PREFIX)),
        });
    }

    override_u64(env, "CATALOG_REFRESH_INTERVAL_SECS", &mut config.catalog.refresh_interval_secs)?;
    override_usize(env, "CATALOG_SAMPLE_OBJECTS", &mut config.catalog.sample_objects)?;

    override_u64(env, "TRANSFORM_INTERVAL_SECS", &mut config.transform.interval_secs)?;

    override_u64(env, "QUERY_MAX_SCANNED_BYTES", &mut config.query.max_scanned_bytes)?;

    if let Some(addr) = env.get(&format!("{}SERVER_LISTEN_ADDR", ENV_PREFIX)) {
        config.server.listen_addr = addr;
    }
    override_usize(env, "SERVER_MAX_PAYLOAD_BYTES", &mut config.server.max_payload_bytes)?;

    Ok(())
}

fn override_usize(env: &dyn EnvSource, key: &str, slot: &mut usize) -> Result<()> {
    if let Some(value) = env.get(&format!("{}{}", ENV_PREFIX, key)) {
        *slot = value
            .parse()
            .with_context(|| format!("invalid {}{}: '{}'", ENV_PREFIX, key, value))?;
    }
    Ok(())
}

fn override_u64(env: &dyn EnvSource, key: &str, slot: &mut u64) -> Result<()> {
    if let Some(value) = env.get(&format!("{}{}", ENV_PREFIX, key)) {
        *slot = value
            .parse()
            .with_context(|| format!("invalid {}{}: '{}'", ENV_PREFIX, key, value))?;
    }
    Ok(())
}

fn override_u32(env: &dyn EnvSource, key: &str, slot: &mut u32) -> Result<()> {
    if let Some(value) = env.get(&format!("{}{}", ENV_PREFIX, key)) {
        *slot = value
            .parse()
            .with_context(|| format!("invalid {}{}: '{}'", ENV_PREFIX, key, value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    #[test]
    fn overrides_take_effect() {
        let mut config = RuntimeConfig::default();
        let env = MapEnv(HashMap::from([
            ("LAKEFLOW_INGEST_MAX_BATCH_BYTES", "4096"),
            ("LAKEFLOW_STORAGE_BACKEND", "fs"),
            ("LAKEFLOW_STORAGE_FS_PATH", "/var/lake"),
            ("LAKEFLOW_QUERY_MAX_SCANNED_BYTES", "500"),
        ]));

        apply_env_overrides(&mut config, &env).unwrap();
        assert_eq!(config.ingest.max_batch_bytes, 4096);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/var/lake");
        assert_eq!(config.query.max_scanned_bytes, 500);
    }

    #[test]
    fn bad_values_fail() {
        let mut config = RuntimeConfig::default();
        let env = MapEnv(HashMap::from([(
            "LAKEFLOW_INGEST_MAX_BATCH_BYTES",
            "one-mebibyte",
        )]));
        assert!(apply_env_overrides(&mut config, &env).is_err());
    }
}
