//! Replication task supervisor
//!
//! Owns one worker per table. Workers are independent: a failed table
//! does not disturb the others, and status/stop/resume address tables by
//! name.

use crate::source::SourceDatabase;
use crate::task::{CdcError, ReplicationTask, TaskStatus};
use lakeflow_storage::ZoneStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const FETCH_MAX: usize = 1_000;

struct Worker {
    task: Arc<ReplicationTask>,
    handle: JoinHandle<()>,
}

pub struct CdcController {
    store: ZoneStore,
    poll_interval: Duration,
    workers: RwLock<HashMap<String, Worker>>,
}

impl CdcController {
    pub fn new(store: ZoneStore) -> Self {
        Self::with_poll_interval(store, Duration::from_secs(5))
    }

    pub fn with_poll_interval(store: ZoneStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Start replicating `table`. The worker runs initialization and full
    /// load, then tails the change log until stopped or failed. Starting
    /// an already-replicated table is an error.
    pub fn start(
        &self,
        table: &str,
        source: Arc<dyn SourceDatabase>,
    ) -> Result<(), CdcError> {
        let mut workers = self.workers.write();
        if workers.contains_key(table) {
            return Err(CdcError::AlreadyReplicating {
                table: table.to_string(),
            });
        }

        let task = Arc::new(ReplicationTask::new(table, source, self.store.clone()));
        let handle = tokio::spawn(run_worker(task.clone(), self.poll_interval));
        workers.insert(table.to_string(), Worker { task, handle });
        tracing::info!(table, "replication worker started");
        Ok(())
    }

    pub fn stop(&self, table: &str) -> Result<(), CdcError> {
        self.task(table)?.stop()
    }

    pub fn resume(&self, table: &str) -> Result<(), CdcError> {
        self.task(table)?.resume()
    }

    pub fn status(&self, table: &str) -> Result<TaskStatus, CdcError> {
        Ok(self.task(table)?.status())
    }

    pub fn status_all(&self) -> Vec<TaskStatus> {
        let mut statuses: Vec<TaskStatus> = self
            .workers
            .read()
            .values()
            .map(|w| w.task.status())
            .collect();
        statuses.sort_by(|a, b| a.table.cmp(&b.table));
        statuses
    }

    /// Abort every worker. Positions are already durable, so the next
    /// start picks up where these left off.
    pub fn shutdown(&self) {
        let mut workers = self.workers.write();
        for (table, worker) in workers.drain() {
            worker.handle.abort();
            tracing::info!(table, "replication worker shut down");
        }
    }

    fn task(&self, table: &str) -> Result<Arc<ReplicationTask>, CdcError> {
        self.workers
            .read()
            .get(table)
            .map(|w| w.task.clone())
            .ok_or_else(|| CdcError::UnknownTable {
                table: table.to_string(),
            })
    }
}

impl Drop for CdcController {
    fn drop(&mut self) {
        for worker in self.workers.write().values() {
            worker.handle.abort();
        }
    }
}

async fn run_worker(task: Arc<ReplicationTask>, poll_interval: Duration) {
    if let Err(e) = task.run_to_streaming().await {
        tracing::error!(error = %e, "replication task failed before streaming");
        return;
    }

    loop {
        match task.stream_once(FETCH_MAX).await {
            Ok(0) => tokio::time::sleep(poll_interval).await,
            Ok(_) => {}
            Err(CdcError::Transient { message }) => {
                tracing::warn!(message, "transient streaming error, retrying");
                tokio::time::sleep(poll_interval).await;
            }
            Err(CdcError::InvalidTransition { .. }) => {
                // Stopped by an operator; idle until resumed or dropped.
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "replication streaming failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LogPosition, RowChange, SourceRow};
    use crate::state::ReplicationState;
    use async_trait::async_trait;
    use chrono::Utc;
    use lakeflow_core::{CdcOp, Zone};
    use serde_json::json;

    struct TinySource;

    #[async_trait]
    impl SourceDatabase for TinySource {
        async fn check_connectivity(&self) -> Result<(), CdcError> {
            Ok(())
        }

        async fn table_row_count(&self, _table: &str) -> Result<u64, CdcError> {
            Ok(1)
        }

        async fn snapshot_table(
            &self,
            _table: &str,
        ) -> Result<(Vec<SourceRow>, LogPosition), CdcError> {
            Ok((
                vec![SourceRow {
                    committed_at: Utc::now(),
                    values: json!({"id": 1}),
                }],
                7,
            ))
        }

        async fn fetch_changes(
            &self,
            _table: &str,
            from: LogPosition,
            _max: usize,
        ) -> Result<Vec<RowChange>, CdcError> {
            if from >= 8 {
                return Ok(Vec::new());
            }
            Ok(vec![RowChange {
                op: CdcOp::Update,
                committed_at: Utc::now(),
                values: json!({"id": 1, "v": 2}),
                position: 8,
            }])
        }
    }

    #[tokio::test]
    async fn controller_runs_table_to_streaming() {
        let store = ZoneStore::new_memory();
        let controller =
            CdcController::with_poll_interval(store.clone(), Duration::from_millis(10));
        controller.start("orders", Arc::new(TinySource)).unwrap();

        // Wait for snapshot plus the first change to land.
        let mut tries = 0;
        loop {
            let status = controller.status("orders").unwrap();
            if status.state == ReplicationState::CdcStreaming && status.position >= 8 {
                break;
            }
            tries += 1;
            assert!(tries < 200, "worker never reached streaming: {:?}", status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let objects = store.list(Zone::Processed, "orders").await.unwrap();
        assert!(objects.len() >= 2, "snapshot and change objects expected");

        controller.stop("orders").unwrap();
        assert_eq!(
            controller.status("orders").unwrap().state,
            ReplicationState::Stopped
        );

        controller.shutdown();
        assert!(controller.status("orders").is_err());
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let controller = CdcController::new(ZoneStore::new_memory());
        controller.start("orders", Arc::new(TinySource)).unwrap();
        assert!(controller.start("orders", Arc::new(TinySource)).is_err());
        controller.shutdown();
    }
}
