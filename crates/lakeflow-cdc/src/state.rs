//! Replication task lifecycle and persisted state

use crate::source::LogPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a replication task.
///
/// `Initializing -> FullLoad -> CdcStreaming -> (Failed | Stopped)`.
/// `Failed` is terminal and requires operator intervention (bad
/// credentials or network are the usual causes). `Stopped` is resumable
/// back to streaming from the last acknowledged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    Initializing,
    FullLoad,
    CdcStreaming,
    Failed,
    Stopped,
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicationState::Initializing => "initializing",
            ReplicationState::FullLoad => "full_load",
            ReplicationState::CdcStreaming => "cdc_streaming",
            ReplicationState::Failed => "failed",
            ReplicationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Phase recorded in the persisted state. Full load deliberately has no
/// sub-table checkpoint: restarting mid-snapshot redoes the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    FullLoad,
    Cdc,
}

/// Durable task state, persisted after every acknowledged write so a
/// restart neither re-replicates nor loses records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub table: String,
    pub position: LogPosition,
    pub mode: TaskMode,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn full_load(table: &str) -> Self {
        Self {
            table: table.to_string(),
            position: 0,
            mode: TaskMode::FullLoad,
            updated_at: Utc::now(),
        }
    }

    pub fn state_key(table: &str) -> String {
        format!("_cdc/{}.json", table)
    }
}
