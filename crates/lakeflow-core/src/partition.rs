//! Partition key derivation and object key layout
//!
//! Hive-style partition paths, hour granularity:
//! `<zone>/<source>/year=YYYY/month=MM/day=DD/hour=HH/<unique>`
//!
//! CDC capture windows use the flat form `<table>/window=YYYYMMDDHH/<unique>`.

use crate::types::Zone;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix under which in-flight objects are written before finalize.
/// Downstream scans must exclude it.
pub const TEMP_PREFIX: &str = "_tmp";

/// Deterministic partition address: source name plus ingestion time
/// truncated to the hour. Two records within the same hour for the same
/// source always map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub source: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl PartitionKey {
    pub fn from_timestamp(source: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: sanitize_source(source),
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
            hour: timestamp.hour(),
        }
    }

    /// Directory prefix for this partition within a zone, without filename.
    pub fn prefix(&self, zone: Zone) -> String {
        format!(
            "{}/{}/year={}/month={:02}/day={:02}/hour={:02}",
            zone.as_str(),
            self.source,
            self.year,
            self.month,
            self.day,
            self.hour
        )
    }

    /// Full object key with a collision-free random suffix. Each flush
    /// generates a fresh suffix so concurrent writers never contend for
    /// the same key.
    pub fn object_key(&self, zone: Zone, extension: &str) -> String {
        format!(
            "{}/{}.{}",
            self.prefix(zone),
            Uuid::new_v4().simple(),
            extension
        )
    }

    /// Object key with a caller-supplied deterministic filename, used by
    /// the transform engine for idempotent rewrites.
    pub fn object_key_named(&self, zone: Zone, filename: &str) -> String {
        format!("{}/{}", self.prefix(zone), filename)
    }

    /// Start of the hour this key covers.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, self.hour, 0, 0)
            .single()
    }
}

/// CDC object key: `<zone>/<table>/window=YYYYMMDDHH/<unique>`.
pub fn cdc_object_key(zone: Zone, table: &str, window: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{}/{}/window={}{:02}{:02}{:02}/{}.{}",
        zone.as_str(),
        sanitize_source(table),
        window.year(),
        window.month(),
        window.day(),
        window.hour(),
        Uuid::new_v4().simple(),
        extension
    )
}

/// Parse `year=/month=/day=/hour=` components back out of an object path.
/// Returns None for paths that do not follow the partition layout.
pub fn parse_partition_window(path: &str) -> Option<DateTime<Utc>> {
    let mut year = None;
    let mut month = None;
    let mut day = None;
    let mut hour = None;

    for segment in path.split('/') {
        if let Some(v) = segment.strip_prefix("year=") {
            year = v.parse::<i32>().ok();
        } else if let Some(v) = segment.strip_prefix("month=") {
            month = v.parse::<u32>().ok();
        } else if let Some(v) = segment.strip_prefix("day=") {
            day = v.parse::<u32>().ok();
        } else if let Some(v) = segment.strip_prefix("hour=") {
            hour = v.parse::<u32>().ok();
        } else if let Some(v) = segment.strip_prefix("window=") {
            if v.len() == 10 {
                year = v[0..4].parse::<i32>().ok();
                month = v[4..6].parse::<u32>().ok();
                day = v[6..8].parse::<u32>().ok();
                hour = v[8..10].parse::<u32>().ok();
            }
        }
    }

    Utc.with_ymd_and_hms(year?, month?, day?, hour?, 0, 0).single()
}

/// Sanitize a source/table name for use as a path segment.
fn sanitize_source(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn same_hour_maps_to_same_key() {
        let a = PartitionKey::from_timestamp("atomic_events", ts("2024-01-15T14:00:01Z"));
        let b = PartitionKey::from_timestamp("atomic_events", ts("2024-01-15T14:59:59Z"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_hour_maps_to_different_key() {
        let a = PartitionKey::from_timestamp("atomic_events", ts("2024-01-15T14:59:59Z"));
        let b = PartitionKey::from_timestamp("atomic_events", ts("2024-01-15T15:00:00Z"));
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_layout() {
        let key = PartitionKey::from_timestamp("atomic_events", ts("2024-01-05T09:30:00Z"));
        assert_eq!(
            key.prefix(Zone::Raw),
            "raw/atomic_events/year=2024/month=01/day=05/hour=09"
        );
    }

    #[test]
    fn object_keys_do_not_collide() {
        let key = PartitionKey::from_timestamp("atomic_events", ts("2024-01-05T09:30:00Z"));
        let a = key.object_key(Zone::Raw, "ndjson.gz");
        let b = key.object_key(Zone::Raw, "ndjson.gz");
        assert_ne!(a, b);
        assert!(a.starts_with("raw/atomic_events/year=2024/"));
        assert!(a.ends_with(".ndjson.gz"));
    }

    #[test]
    fn window_round_trips_through_path() {
        let key = PartitionKey::from_timestamp("events", ts("2024-06-30T23:10:00Z"));
        let path = key.object_key(Zone::Processed, "parquet");
        assert_eq!(parse_partition_window(&path), key.window_start());
    }

    #[test]
    fn source_names_are_sanitized() {
        let key = PartitionKey::from_timestamp("my source/1", ts("2024-01-01T00:00:00Z"));
        assert_eq!(key.source, "my_source_1");
    }

    #[test]
    fn cdc_keys_use_capture_window() {
        let key = cdc_object_key(Zone::Processed, "orders", ts("2024-03-02T07:00:00Z"), "parquet");
        assert!(key.starts_with("processed/orders/window=2024030207/"));
    }

    #[test]
    fn cdc_window_parses_back() {
        let key = cdc_object_key(Zone::Processed, "orders", ts("2024-03-02T07:00:00Z"), "parquet");
        assert_eq!(parse_partition_window(&key), Some(ts("2024-03-02T07:00:00Z")));
    }
}
