// lakeflow-core - shared data model for the lake pipeline
//
// Everything that moves between pipeline stages lives here: records and
// their CDC variants, zone/partition addressing, payload normalization,
// NDJSON batch framing and the Arrow/Parquet encoding used by the
// processed and curated zones.

mod columnar;
mod ndjson;
mod normalize;
mod partition;
mod record;
mod types;

pub use columnar::{infer_arrow_schema, records_to_batch, write_parquet, writer_properties};
pub use ndjson::{decode_ndjson_gz, encode_ndjson_gz};
pub use normalize::normalize_payload;
pub use partition::{cdc_object_key, parse_partition_window, PartitionKey, TEMP_PREFIX};
pub use record::{CdcOp, Record};
pub use types::{ContentHash, Zone, ERROR_SINK_PREFIX};
