//! Per-table replication worker
//!
//! Sequential by construction: the same task object runs full load and
//! then tails the change log, so snapshot rows and change rows for one
//! table can never interleave ambiguously in the target.

use crate::source::{LogPosition, SourceDatabase};
use crate::state::{ReplicationState, TaskMode, TaskState};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use lakeflow_core::{cdc_object_key, records_to_batch, write_parquet, CdcOp, Record, Zone};
use lakeflow_storage::ZoneStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

const FULL_LOAD_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum CdcError {
    /// Persistent connectivity/credential failure. Not retried
    /// automatically; requires operator action.
    #[error("source connectivity failed: {message}")]
    Connectivity { message: String },

    /// Transient failure; the caller retries from the last acknowledged
    /// position.
    #[error("transient source error: {message}")]
    Transient { message: String },

    #[error("snapshot of '{table}' did not reconcile: wrote {actual} rows, source reports {expected}")]
    SnapshotMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },

    #[error("no replication task for table '{table}'")]
    UnknownTable { table: String },

    #[error("table '{table}' is already replicating")]
    AlreadyReplicating { table: String },

    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: ReplicationState,
    },

    #[error("target storage error: {0}")]
    Storage(#[from] lakeflow_storage::StorageError),

    #[error("target encoding error: {0}")]
    Encoding(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub table: String,
    pub state: ReplicationState,
    pub position: LogPosition,
}

pub struct ReplicationTask {
    table: String,
    source: Arc<dyn SourceDatabase>,
    store: ZoneStore,
    state: RwLock<ReplicationState>,
    position: AtomicU64,
    last_extracted_micros: AtomicI64,
}

impl ReplicationTask {
    pub fn new(table: impl Into<String>, source: Arc<dyn SourceDatabase>, store: ZoneStore) -> Self {
        Self {
            table: table.into(),
            source,
            store,
            state: RwLock::new(ReplicationState::Initializing),
            position: AtomicU64::new(0),
            last_extracted_micros: AtomicI64::new(0),
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            table: self.table.clone(),
            state: *self.state.read(),
            position: self.position.load(Ordering::SeqCst),
        }
    }

    /// Initialize and run the full load, leaving the task streaming.
    /// Resumes a previously persisted task directly into streaming
    /// without re-replicating the snapshot.
    pub async fn run_to_streaming(&self) -> Result<(), CdcError> {
        if let Some(persisted) = self
            .store
            .get_json::<TaskState>(&TaskState::state_key(&self.table))
            .await?
        {
            if persisted.mode == TaskMode::Cdc {
                self.position.store(persisted.position, Ordering::SeqCst);
                *self.state.write() = ReplicationState::CdcStreaming;
                tracing::info!(
                    table = self.table,
                    position = persisted.position,
                    "resuming replication from persisted position"
                );
                return Ok(());
            }
        }

        self.initialize().await?;
        self.full_load().await
    }

    /// Validate source connectivity and target writability. A failure
    /// here is terminal: credentials or network are the likely cause and
    /// retrying cannot fix either.
    pub async fn initialize(&self) -> Result<(), CdcError> {
        *self.state.write() = ReplicationState::Initializing;

        if let Err(e) = self.source.check_connectivity().await {
            *self.state.write() = ReplicationState::Failed;
            tracing::error!(table = self.table, error = %e, "replication initialization failed");
            return Err(e);
        }

        // Target writability probe.
        let probe_key = format!("_cdc/.probe-{}", self.table);
        if let Err(e) = self.store.put_json(&probe_key, &Utc::now()).await {
            *self.state.write() = ReplicationState::Failed;
            return Err(e.into());
        }
        self.store.delete(&probe_key).await?;

        *self.state.write() = ReplicationState::FullLoad;
        Ok(())
    }

    /// Snapshot every row of the table into the target in compacted form.
    /// Not checkpointed below table granularity: a partial failure redoes
    /// the whole table.
    pub async fn full_load(&self) -> Result<(), CdcError> {
        {
            let state = *self.state.read();
            if state != ReplicationState::FullLoad {
                return Err(CdcError::InvalidTransition {
                    action: "full-load",
                    state,
                });
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_full_load().await {
                Ok(position) => {
                    self.position.store(position, Ordering::SeqCst);
                    self.persist_state(TaskMode::Cdc, position).await?;
                    *self.state.write() = ReplicationState::CdcStreaming;
                    tracing::info!(
                        table = self.table,
                        position,
                        attempt,
                        "full load complete, streaming"
                    );
                    return Ok(());
                }
                Err(e @ (CdcError::Transient { .. } | CdcError::SnapshotMismatch { .. }))
                    if attempt < FULL_LOAD_ATTEMPTS =>
                {
                    tracing::warn!(
                        table = self.table,
                        attempt,
                        error = %e,
                        "full load attempt failed, restarting table snapshot from scratch"
                    );
                }
                Err(e) => {
                    *self.state.write() = ReplicationState::Failed;
                    return Err(e);
                }
            }
        }
    }

    async fn try_full_load(&self) -> Result<LogPosition, CdcError> {
        let (rows, position) = self.source.snapshot_table(&self.table).await?;
        let expected = self.source.table_row_count(&self.table).await?;
        if rows.len() as u64 != expected {
            return Err(CdcError::SnapshotMismatch {
                table: self.table.clone(),
                expected,
                actual: rows.len() as u64,
            });
        }

        if !rows.is_empty() {
            let records: Vec<Record> = rows
                .into_iter()
                .map(|row| {
                    Record::change(
                        &self.table,
                        row.committed_at,
                        row.values,
                        CdcOp::Insert,
                        self.next_extraction_ts(),
                    )
                })
                .collect();
            self.write_target(&records).await?;
            metrics::counter!("lakeflow.cdc.snapshot_rows").increment(records.len() as u64);
        }

        Ok(position)
    }

    /// One streaming iteration: fetch changes after the acknowledged
    /// position, append them op-tagged to the target, then acknowledge.
    ///
    /// The position advances only after the target write is durable, so a
    /// crash between write and acknowledge re-delivers the same changes:
    /// at-least-once, deduplicable downstream by primary key plus
    /// extraction timestamp.
    pub async fn stream_once(&self, max: usize) -> Result<usize, CdcError> {
        {
            let state = *self.state.read();
            if state != ReplicationState::CdcStreaming {
                return Err(CdcError::InvalidTransition {
                    action: "stream",
                    state,
                });
            }
        }

        let from = self.position.load(Ordering::SeqCst);
        let changes = self.source.fetch_changes(&self.table, from, max).await?;
        if changes.is_empty() {
            return Ok(0);
        }

        let acked = changes.last().map(|c| c.position).unwrap_or(from);
        let records: Vec<Record> = changes
            .into_iter()
            .map(|change| {
                Record::change(
                    &self.table,
                    change.committed_at,
                    change.values,
                    change.op,
                    self.next_extraction_ts(),
                )
            })
            .collect();

        self.write_target(&records).await?;
        self.position.store(acked, Ordering::SeqCst);
        self.persist_state(TaskMode::Cdc, acked).await?;

        metrics::counter!("lakeflow.cdc.changes").increment(records.len() as u64);
        tracing::debug!(table = self.table, count = records.len(), acked, "changes replicated");
        Ok(records.len())
    }

    /// Operator-initiated stop. Streaming position stays acknowledged so
    /// `resume` continues without loss.
    pub fn stop(&self) -> Result<(), CdcError> {
        let mut state = self.state.write();
        match *state {
            ReplicationState::CdcStreaming => {
                *state = ReplicationState::Stopped;
                Ok(())
            }
            other => Err(CdcError::InvalidTransition {
                action: "stop",
                state: other,
            }),
        }
    }

    pub fn resume(&self) -> Result<(), CdcError> {
        let mut state = self.state.write();
        match *state {
            ReplicationState::Stopped => {
                *state = ReplicationState::CdcStreaming;
                Ok(())
            }
            other => Err(CdcError::InvalidTransition {
                action: "resume",
                state: other,
            }),
        }
    }

    /// Append records to the target under the current capture window.
    /// Target objects are never mutated; every write is a new object.
    async fn write_target(&self, records: &[Record]) -> Result<(), CdcError> {
        let batch = records_to_batch(records)?;
        let parquet = write_parquet(&batch)?;
        let window = current_hour();
        let key = cdc_object_key(Zone::Processed, &self.table, window, "parquet");
        self.store.put_object(&key, parquet).await?;
        Ok(())
    }

    async fn persist_state(&self, mode: TaskMode, position: LogPosition) -> Result<(), CdcError> {
        let state = TaskState {
            table: self.table.clone(),
            position,
            mode,
            updated_at: Utc::now(),
        };
        self.store
            .put_json(&TaskState::state_key(&self.table), &state)
            .await?;
        Ok(())
    }

    /// Strictly increasing extraction timestamps, even when the clock
    /// stalls within a microsecond. Downstream replay order depends on
    /// this.
    fn next_extraction_ts(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let mut prev = self.last_extracted_micros.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_extracted_micros.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Utc
                        .timestamp_micros(next)
                        .single()
                        .unwrap_or_else(Utc::now)
                }
                Err(actual) => prev = actual,
            }
        }
    }
}

fn current_hour() -> DateTime<Utc> {
    Utc::now()
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(Utc::now)
}
