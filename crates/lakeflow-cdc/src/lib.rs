// lakeflow-cdc - change-data-capture replication
//
// Replicates relational tables into the processed zone: an initial full
// snapshot followed by continuous change-log tailing. One sequential
// worker per table; snapshot and streaming phases never interleave for
// the same table. Target records are append-only and op-tagged, so
// downstream consumers reconstruct row history by replaying operations
// in extraction-timestamp order.

mod controller;
mod source;
mod state;
mod task;

pub use controller::CdcController;
pub use source::{LogPosition, RowChange, SourceDatabase, SourceRow};
pub use state::{ReplicationState, TaskMode, TaskState};
pub use task::{CdcError, ReplicationTask, TaskStatus};
