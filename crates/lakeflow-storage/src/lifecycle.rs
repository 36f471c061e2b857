//! Object aging policy for the raw tier
//!
//! Objects are never deleted: they step down through storage tiers as
//! they age (standard -> infrequent access -> archive). Interrupted
//! writes left under the temp prefix are the one thing that is collected,
//! after a bounded grace period, so a crashed flush cannot leak storage
//! forever.

use crate::{ObjectMeta, Result, ZoneStore};
use chrono::{DateTime, Duration, Utc};
use lakeflow_config::LifecycleConfig;
use serde::Serialize;

/// Storage tier a finalized object should occupy given its age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Standard,
    InfrequentAccess,
    Archive,
}

/// Planned transition for one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierTransition {
    pub path: String,
    pub tier: StorageTier,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    infrequent_access_after: Duration,
    archive_after: Duration,
    temp_grace: Duration,
}

impl LifecyclePolicy {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            infrequent_access_after: Duration::days(config.infrequent_access_days as i64),
            archive_after: Duration::days(config.archive_days as i64),
            temp_grace: Duration::days(config.temp_grace_days as i64),
        }
    }

    pub fn tier_for_age(&self, age: Duration) -> StorageTier {
        if age >= self.archive_after {
            StorageTier::Archive
        } else if age >= self.infrequent_access_after {
            StorageTier::InfrequentAccess
        } else {
            StorageTier::Standard
        }
    }

    /// Compute the transitions a tier sweep should apply. Objects without
    /// a modification timestamp are left in standard; the backend will
    /// report one eventually.
    pub fn plan_transitions(
        &self,
        objects: &[ObjectMeta],
        now: DateTime<Utc>,
    ) -> Vec<TierTransition> {
        objects
            .iter()
            .filter_map(|obj| {
                let modified = obj.last_modified?;
                let tier = self.tier_for_age(now - modified);
                if tier == StorageTier::Standard {
                    None
                } else {
                    Some(TierTransition {
                        path: obj.path.clone(),
                        tier,
                    })
                }
            })
            .collect()
    }

    /// Delete temp objects older than the grace period. Returns the
    /// number collected.
    pub async fn collect_stale_temp(&self, store: &ZoneStore, now: DateTime<Utc>) -> Result<usize> {
        let mut collected = 0;
        for obj in store.list_temp().await? {
            let stale = match obj.last_modified {
                Some(modified) => now - modified >= self.temp_grace,
                // No timestamp means we cannot prove it is fresh; keep it.
                None => false,
            };
            if stale {
                store.delete(&obj.path).await?;
                tracing::info!(path = obj.path, "collected stale temp object");
                collected += 1;
            }
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy::from_config(&LifecycleConfig::default())
    }

    #[test]
    fn tier_thresholds() {
        let p = policy();
        assert_eq!(p.tier_for_age(Duration::days(1)), StorageTier::Standard);
        assert_eq!(p.tier_for_age(Duration::days(89)), StorageTier::Standard);
        assert_eq!(
            p.tier_for_age(Duration::days(90)),
            StorageTier::InfrequentAccess
        );
        assert_eq!(
            p.tier_for_age(Duration::days(359)),
            StorageTier::InfrequentAccess
        );
        assert_eq!(p.tier_for_age(Duration::days(360)), StorageTier::Archive);
    }

    #[test]
    fn plan_skips_fresh_objects() {
        let now = Utc::now();
        let objects = vec![
            ObjectMeta {
                path: "raw/a".into(),
                size: 1,
                last_modified: Some(now - Duration::days(10)),
            },
            ObjectMeta {
                path: "raw/b".into(),
                size: 1,
                last_modified: Some(now - Duration::days(100)),
            },
            ObjectMeta {
                path: "raw/c".into(),
                size: 1,
                last_modified: None,
            },
        ];

        let transitions = policy().plan_transitions(&objects, now);
        assert_eq!(
            transitions,
            vec![TierTransition {
                path: "raw/b".into(),
                tier: StorageTier::InfrequentAccess
            }]
        );
    }
}
