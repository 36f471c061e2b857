use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix for objects diverted out of the main stream: malformed records
/// and batches whose writes exhausted their retries.
pub const ERROR_SINK_PREFIX: &str = "bad_records";

/// Storage tier of the lake.
///
/// Raw holds ingested data in near-original shape, processed holds
/// columnar rewrites, curated holds business-ready aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Raw,
    Processed,
    Curated,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Raw => "raw",
            Zone::Processed => "processed",
            Zone::Curated => "curated",
        }
    }

    pub fn all() -> [Zone; 3] {
        [Zone::Raw, Zone::Processed, Zone::Curated]
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Zone::Raw),
            "processed" => Ok(Zone::Processed),
            "curated" => Ok(Zone::Curated),
            other => anyhow::bail!("unknown zone '{}' (expected raw|processed|curated)", other),
        }
    }
}

/// Blake3 content hash used for deterministic object filenames.
///
/// Rewriting identical bytes produces the identical key, so reprocessing
/// never duplicates output objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// First 16 hex characters, enough to keep filenames short and unique.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_round_trip() {
        for zone in Zone::all() {
            assert_eq!(zone.as_str().parse::<Zone>().unwrap(), zone);
        }
        assert!("cooked".parse::<Zone>().is_err());
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = ContentHash::of(b"hello");
        let b = ContentHash::of(b"hello");
        let c = ContentHash::of(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.short_hex().len(), 16);
    }
}
