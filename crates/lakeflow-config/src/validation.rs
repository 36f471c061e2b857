// Configuration validation.
//
// Required fields present, values sensible; warns on sizes that will
// hurt, fails on sizes that cannot work.

use crate::{RuntimeConfig, StorageBackend};
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_ingest(config)?;
    validate_storage(config)?;
    validate_catalog(config)?;
    validate_lifecycle(config)?;
    validate_query(config)?;
    Ok(())
}

fn validate_ingest(config: &RuntimeConfig) -> Result<()> {
    let ingest = &config.ingest;
    if ingest.max_batch_bytes == 0 {
        bail!("ingest.max_batch_bytes must be greater than 0");
    }
    if ingest.max_batch_age_secs == 0 {
        bail!("ingest.max_batch_age_secs must be greater than 0");
    }
    if ingest.max_buffered_bytes < ingest.max_batch_bytes {
        bail!(
            "ingest.max_buffered_bytes ({}) must be at least ingest.max_batch_bytes ({})",
            ingest.max_buffered_bytes,
            ingest.max_batch_bytes
        );
    }
    if ingest.max_batch_bytes > 512 * 1024 * 1024 {
        warn!(
            max_batch_bytes = ingest.max_batch_bytes,
            "ingest.max_batch_bytes is very large; raw objects this size defeat partition pruning"
        );
    }
    Ok(())
}

fn validate_storage(config: &RuntimeConfig) -> Result<()> {
    match config.storage.backend {
        StorageBackend::Fs => {
            if config.storage.fs.is_none() {
                bail!("storage.fs.path is required for the fs backend");
            }
        }
        StorageBackend::S3 => {
            let s3 = match &config.storage.s3 {
                Some(s3) => s3,
                None => bail!("storage.s3 section is required for the s3 backend"),
            };
            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket must not be empty");
            }
            if s3.region.is_empty() {
                bail!("storage.s3.region must not be empty");
            }
        }
        StorageBackend::Memory => {}
    }
    Ok(())
}

fn validate_catalog(config: &RuntimeConfig) -> Result<()> {
    if config.catalog.refresh_interval_secs == 0 {
        bail!("catalog.refresh_interval_secs must be greater than 0");
    }
    if config.catalog.sample_objects == 0 {
        bail!("catalog.sample_objects must be greater than 0");
    }
    Ok(())
}

fn validate_lifecycle(config: &RuntimeConfig) -> Result<()> {
    let lifecycle = &config.lifecycle;
    if lifecycle.archive_days <= lifecycle.infrequent_access_days {
        bail!(
            "lifecycle.archive_days ({}) must be later than lifecycle.infrequent_access_days ({})",
            lifecycle.archive_days,
            lifecycle.infrequent_access_days
        );
    }
    Ok(())
}

fn validate_query(config: &RuntimeConfig) -> Result<()> {
    if config.query.max_scanned_bytes == 0 {
        bail!("query.max_scanned_bytes must be greater than 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn zero_batch_bytes_fails() {
        let mut config = RuntimeConfig::default();
        config.ingest.max_batch_bytes = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn fs_backend_requires_path() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Fs;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn inverted_lifecycle_fails() {
        let mut config = RuntimeConfig::default();
        config.lifecycle.infrequent_access_days = 400;
        assert!(validate_config(&config).is_err());
    }
}
