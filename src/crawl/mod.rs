//! Timeline crawling: the per-job loop and its building blocks.
//!
//! A `CrawlJob` repeatedly extracts the visible records, classifies them
//! with a `DedupLedger`, persists the new ones, asks the
//! `TerminationPolicy` whether to stop, and otherwise lets the
//! `ScrollDriver` load more content.

mod engine;
mod job;
mod ledger;
mod limits;
mod scroll;
mod state;
mod termination;

pub use engine::{CrawlEngine, CrawlExecutor};
pub use job::{CrawlJob, CrawlRequest};
pub use ledger::{Classification, DedupLedger};
pub use limits::CrawlLimits;
pub use scroll::{ScrollDriver, ScrollReport};
pub use state::{JobProgress, RunState};
pub use termination::{TerminationPolicy, Verdict};
