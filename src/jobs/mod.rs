//! Job control: at most one crawl per target, at most N crawls overall.

mod error;
mod manager;

pub use error::ExclusivityError;
pub use manager::{JobExclusivityManager, JobStatus, RunningJob};
