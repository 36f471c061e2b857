// lakeflow-transform - raw to processed rewriter
//
// Periodic batch job: picks up raw-zone objects not yet covered by the
// checkpoint, normalizes their records and rewrites them as Parquet in
// the processed zone under the same partition scheme. Output filenames
// are content hashes, so reprocessing the same input lands on the same
// key instead of duplicating rows.

mod checkpoint;
mod engine;

pub use checkpoint::{CheckpointStore, TransformCheckpoint};
pub use engine::{TransformEngine, TransformError, TransformReport};
