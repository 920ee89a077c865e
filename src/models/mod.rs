pub mod batch;
pub mod job;
pub mod progress;
pub mod result;

pub use batch::{aggregate_text, Batch, BatchOutcome, BatchResult};
pub use job::{ContentType, Job};
pub use progress::{
    ignore_progress, progress_channel, progress_fraction, JobEvent, JobEventSink,
    ProgressCallback, ProgressUpdate,
};
pub use result::{JobResult, JobStatus};
