//! Durable mirror of crawl job status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskResult;

/// Status of a job as mirrored to durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One crawl job as seen by durable storage.
///
/// Slot bookkeeping lives in process memory only, so a row can stay
/// `running` after a crash; `JobStatusStore::fail_orphaned` repairs that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: Uuid,
    pub target_id: String,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<TaskResult>,
    pub error: Option<String>,
    /// Hostname of the process that ran the job.
    pub host: Option<String>,
}

impl JobRun {
    pub fn started(job_id: Uuid, target_id: &str) -> Self {
        Self {
            job_id,
            target_id: target_id.to_string(),
            status: JobRunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            summary: None,
            error: None,
            host: current_host(),
        }
    }

    /// Apply a terminal result to this row.
    pub fn finish(&mut self, result: &TaskResult) {
        self.status = if result.success {
            JobRunStatus::Completed
        } else {
            JobRunStatus::Failed
        };
        self.finished_at = Some(result.finished_at);
        self.error = result.error.as_ref().map(|e| e.message.clone());
        self.summary = Some(result.clone());
    }
}

/// Get the current hostname.
pub(crate) fn current_host() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
