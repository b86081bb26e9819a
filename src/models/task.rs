//! Terminal crawl results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a crawl run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    TargetReached,
    ConsecutiveDuplicates,
    ScrollExhausted,
    MaxScrollAttempts,
    Cancelled,
    Timeout,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetReached => "TARGET_REACHED",
            Self::ConsecutiveDuplicates => "CONSECUTIVE_DUPLICATES",
            Self::ScrollExhausted => "SCROLL_EXHAUSTED",
            Self::MaxScrollAttempts => "MAX_SCROLL_ATTEMPTS",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TARGET_REACHED" => Some(Self::TargetReached),
            "CONSECUTIVE_DUPLICATES" => Some(Self::ConsecutiveDuplicates),
            "SCROLL_EXHAUSTED" => Some(Self::ScrollExhausted),
            "MAX_SCROLL_ATTEMPTS" => Some(Self::MaxScrollAttempts),
            "CANCELLED" => Some(Self::Cancelled),
            "TIMEOUT" => Some(Self::Timeout),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// Natural completions of a crawl. Cancellation, timeout and errors are not.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::TargetReached
                | Self::ConsecutiveDuplicates
                | Self::ScrollExhausted
                | Self::MaxScrollAttempts
        )
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause attached to an `ERROR` (or failed) result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Stable snake_case identifier, e.g. `navigation_timeout`.
    pub code: String,
    pub message: String,
}

impl TaskError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Immutable summary emitted exactly once per crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub job_id: Uuid,
    pub target_id: String,
    pub success: bool,
    pub end_reason: EndReason,
    pub new_count: usize,
    pub task_local_duplicate_count: usize,
    pub persisted_duplicate_count: usize,
    pub skipped_count: usize,
    pub scroll_attempts: u32,
    pub cycles: u32,
    pub execution_time_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskResult {
    /// Result for a job whose task died before producing its own summary.
    pub fn aborted(
        job_id: Uuid,
        target_id: &str,
        started_at: DateTime<Utc>,
        error: TaskError,
    ) -> Self {
        let finished_at = Utc::now();
        let execution_time_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            job_id,
            target_id: target_id.to_string(),
            success: false,
            end_reason: EndReason::Error,
            new_count: 0,
            task_local_duplicate_count: 0,
            persisted_duplicate_count: 0,
            skipped_count: 0,
            scroll_attempts: 0,
            cycles: 0,
            execution_time_ms,
            started_at,
            finished_at,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_reason_roundtrip_names() {
        for reason in [
            EndReason::TargetReached,
            EndReason::ConsecutiveDuplicates,
            EndReason::ScrollExhausted,
            EndReason::MaxScrollAttempts,
            EndReason::Cancelled,
            EndReason::Timeout,
            EndReason::Error,
        ] {
            assert_eq!(EndReason::from_str(reason.as_str()), Some(reason));
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
        assert_eq!(EndReason::from_str("DONE"), None);
    }

    #[test]
    fn test_success_classification() {
        assert!(EndReason::TargetReached.is_success());
        assert!(EndReason::ScrollExhausted.is_success());
        assert!(!EndReason::Cancelled.is_success());
        assert!(!EndReason::Timeout.is_success());
        assert!(!EndReason::Error.is_success());
    }

    #[test]
    fn test_result_wire_format_is_camel_case() {
        let result = TaskResult::aborted(
            Uuid::new_v4(),
            "list-a",
            Utc::now(),
            TaskError::new("job_panicked", "boom"),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["endReason"], "ERROR");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "job_panicked");
        assert!(value.get("executionTimeMs").is_some());
        assert!(value.get("taskLocalDuplicateCount").is_some());
    }
}
