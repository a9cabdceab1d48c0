//! Resumable bulk reindexing
//!
//! [`ReindexJob`] consumes a snapshot of record groups one bounded batch per
//! call; [`JobHost`] persists its state between ticks through a
//! [`JobStateStore`] and queues a fresh job once the previous one completes.

mod error;
mod host;
mod job;
mod source;

pub use error::{IndexingError, IndexingResult};
pub use host::{
    JobHost, JobStateStore, MemoryStateStore, QueuedJob, ReindexScheduler, SledStateStore,
    TickOutcome,
};
pub use job::{
    BatchReport, JobStatus, RecordGroup, ReindexJob, ReindexJobState, DONE_MESSAGE, JOB_TITLE,
};
pub use source::{RecordSource, StaticRecordSource};
