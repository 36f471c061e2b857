//! Source database access seam
//!
//! The replication task talks to the operational database through this
//! trait; production wires a real client, tests wire a scripted source.

use crate::task::CdcError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lakeflow_core::CdcOp;
use serde_json::Value;

/// Monotonic position in the source's change log.
pub type LogPosition = u64;

/// One row as seen by the full-load snapshot.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub committed_at: DateTime<Utc>,
    pub values: Value,
}

/// One change-log entry.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub op: CdcOp,
    pub committed_at: DateTime<Utc>,
    pub values: Value,
    /// Position of this change; acknowledging it resumes tailing after
    /// this entry.
    pub position: LogPosition,
}

#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Cheap connectivity probe used during initialization.
    async fn check_connectivity(&self) -> Result<(), CdcError>;

    /// Authoritative row count used to reconcile a completed snapshot.
    async fn table_row_count(&self, table: &str) -> Result<u64, CdcError>;

    /// Every current row of the table plus the log position the snapshot
    /// was taken at. Streaming resumes from that position so no change is
    /// lost between snapshot and tail.
    async fn snapshot_table(&self, table: &str)
        -> Result<(Vec<SourceRow>, LogPosition), CdcError>;

    /// Changes strictly after `from`, in commit order, at most `max`.
    async fn fetch_changes(
        &self,
        table: &str,
        from: LogPosition,
        max: usize,
    ) -> Result<Vec<RowChange>, CdcError>;
}
