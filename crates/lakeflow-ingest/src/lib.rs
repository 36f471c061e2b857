// lakeflow-ingest - ingestion gateway
//
// Accepts records from many concurrent producers, buffers them per
// destination partition and seals a batch when buffered bytes or buffer
// age cross the configured thresholds. Sealed batches are written to the
// raw zone by the batch writer; records are acknowledged only once their
// batch object is finalized.

mod buffer;
mod flush;

pub use buffer::{Gateway, SealedBatch, SubmitError};
pub use flush::{BatchWriter, FlushError, FlushReport};
