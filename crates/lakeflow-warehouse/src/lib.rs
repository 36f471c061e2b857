// lakeflow-warehouse - query layer and bulk loader
//
// Two ways out of the lake: federated queries planned directly against
// partitioned zone objects (with a hard cap on bytes scanned), and bulk
// loads that copy a source's objects into a warehouse dataset in one
// all-or-nothing commit.

mod load;
mod query;

pub use load::{BulkLoader, LoadError, LoadManifest, LoadReport, LoadedObject};
pub use query::{QueryEngine, QueryError, QueryPlan, QueryResult, TimeRange};
