//! Per-run thresholds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Crawl thresholds. A value of 0 disables the corresponding limit, except
/// `min_scroll_distance_px` and the settle delay which are used as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlLimits {
    /// Stop after this many newly persisted records.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Stop after this many consecutive already-persisted records.
    #[serde(default = "default_duplicate_stop_threshold")]
    pub duplicate_stop_threshold: usize,

    /// Stop after this many consecutive scrolls that moved less than
    /// `min_scroll_distance_px`.
    #[serde(default = "default_max_ineffective_scrolls")]
    pub max_ineffective_scrolls: u32,

    #[serde(default = "default_min_scroll_distance_px")]
    pub min_scroll_distance_px: f64,

    /// Hard cap on load-more actions.
    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: u32,

    /// Wait after each load-more action for content to render.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Wall-clock budget for the whole run.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    #[serde(default = "default_max_consecutive_extraction_failures")]
    pub max_consecutive_extraction_failures: u32,

    /// Local retries for each failed upsert.
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,

    /// Consecutive cycles in which every storage call failed before the run
    /// gives up.
    #[serde(default = "default_max_storage_outage_cycles")]
    pub max_storage_outage_cycles: u32,

    /// Count reposts as skipped instead of persisting them.
    #[serde(default = "default_skip_reposts")]
    pub skip_reposts: bool,
}

fn default_max_records() -> usize {
    100
}

fn default_duplicate_stop_threshold() -> usize {
    5
}

fn default_max_ineffective_scrolls() -> u32 {
    3
}

fn default_min_scroll_distance_px() -> f64 {
    100.0
}

fn default_max_scroll_attempts() -> u32 {
    500
}

fn default_settle_delay_ms() -> u64 {
    1500
}

fn default_max_duration_secs() -> u64 {
    1800
}

fn default_max_consecutive_extraction_failures() -> u32 {
    3
}

fn default_persist_retries() -> u32 {
    2
}

fn default_max_storage_outage_cycles() -> u32 {
    3
}

fn default_skip_reposts() -> bool {
    true
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            duplicate_stop_threshold: default_duplicate_stop_threshold(),
            max_ineffective_scrolls: default_max_ineffective_scrolls(),
            min_scroll_distance_px: default_min_scroll_distance_px(),
            max_scroll_attempts: default_max_scroll_attempts(),
            settle_delay_ms: default_settle_delay_ms(),
            max_duration_secs: default_max_duration_secs(),
            max_consecutive_extraction_failures: default_max_consecutive_extraction_failures(),
            persist_retries: default_persist_retries(),
            max_storage_outage_cycles: default_max_storage_outage_cycles(),
            skip_reposts: default_skip_reposts(),
        }
    }
}

impl CrawlLimits {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// `None` when the run has no wall-clock limit.
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_duration_secs > 0).then(|| Duration::from_secs(self.max_duration_secs))
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_duplicate_stop_threshold(mut self, threshold: usize) -> Self {
        self.duplicate_stop_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let limits: CrawlLimits = toml::from_str(
            r#"
            max_records = 20
            settle_delay_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(limits.max_records, 20);
        assert_eq!(limits.settle_delay(), Duration::ZERO);
        assert_eq!(limits.duplicate_stop_threshold, 5);
        assert_eq!(limits.max_ineffective_scrolls, 3);
        assert_eq!(limits.min_scroll_distance_px, 100.0);
        assert!(limits.skip_reposts);
    }

    #[test]
    fn test_zero_duration_means_unbounded() {
        let limits = CrawlLimits {
            max_duration_secs: 0,
            ..Default::default()
        };
        assert_eq!(limits.max_duration(), None);
        assert_eq!(
            CrawlLimits::default().max_duration(),
            Some(Duration::from_secs(1800))
        );
    }
}
