// Configuration source loading.
//
// Priority order:
// 1. Environment variables (LAKEFLOW_* prefix)
// 2. Config file path from LAKEFLOW_CONFIG
// 3. Default config files (./lakeflow.toml, ./.lakeflow.toml)
// 4. Built-in defaults

use crate::env_overrides::{self, StdEnvSource};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = match load_from_file()? {
        Some(file_config) => file_config,
        None => RuntimeConfig::default(),
    };

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var("LAKEFLOW_CONFIG") {
        return parse_file(Path::new(&path)).map(Some);
    }

    for path in &["./lakeflow.toml", "./.lakeflow.toml"] {
        if Path::new(path).exists() {
            return parse_file(Path::new(path)).map(Some);
        }
    }

    Ok(None)
}

/// Load configuration from a specific file path (for the CLI --config
/// flag). Environment overrides still apply on top.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let mut config = parse_file(path.as_ref())?;
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}
