//! Mutable state of one crawl run.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::EndReason;

/// Counters owned by a single `CrawlJob`.
///
/// `end_reason` can only be set once; later attempts are ignored so the first
/// terminal decision is the one reported.
#[derive(Debug)]
pub struct RunState {
    pub target_id: String,
    pub new_count: usize,
    pub task_local_duplicate_count: usize,
    pub persisted_duplicate_count: usize,
    pub skipped_count: usize,
    pub consecutive_persisted_duplicates: usize,
    pub consecutive_ineffective_scrolls: u32,
    pub consecutive_extraction_failures: u32,
    pub consecutive_storage_outages: u32,
    pub scroll_attempts: u32,
    pub cycles: u32,
    pub started_at: DateTime<Utc>,
    pub(crate) started: Instant,
    end_reason: Option<EndReason>,
}

impl RunState {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            new_count: 0,
            task_local_duplicate_count: 0,
            persisted_duplicate_count: 0,
            skipped_count: 0,
            consecutive_persisted_duplicates: 0,
            consecutive_ineffective_scrolls: 0,
            consecutive_extraction_failures: 0,
            consecutive_storage_outages: 0,
            scroll_attempts: 0,
            cycles: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            end_reason: None,
        }
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Record the terminal reason. Returns `false` if one was already set.
    pub fn finish(&mut self, reason: EndReason) -> bool {
        if self.end_reason.is_some() {
            return false;
        }
        self.end_reason = Some(reason);
        true
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            new_count: self.new_count,
            task_local_duplicate_count: self.task_local_duplicate_count,
            persisted_duplicate_count: self.persisted_duplicate_count,
            skipped_count: self.skipped_count,
            scroll_attempts: self.scroll_attempts,
            cycles: self.cycles,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Point-in-time view of a running job, published after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub new_count: usize,
    pub task_local_duplicate_count: usize,
    pub persisted_duplicate_count: usize,
    pub skipped_count: usize,
    pub scroll_attempts: u32,
    pub cycles: u32,
    pub elapsed_ms: u64,
}
