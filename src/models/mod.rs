//! Data models for listcrawl.

mod job_run;
mod record;
mod task;

pub use job_run::{JobRun, JobRunStatus};
pub use record::{now_millis, Record};
pub use task::{EndReason, TaskError, TaskResult};
