//! Stop/continue decision evaluated once per cycle.

use super::limits::CrawlLimits;
use super::state::RunState;
use crate::models::EndReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop(EndReason),
}

/// Reconciles the target count, duplicate streak, scroll metrics,
/// cancellation and error streaks into one decision.
///
/// Rules are checked in a fixed order and the first match wins:
///
/// 1. `new_count >= max_records` → `TargetReached`
/// 2. persisted-duplicate streak `>= duplicate_stop_threshold` → `ConsecutiveDuplicates`
/// 3. ineffective-scroll streak `>= max_ineffective_scrolls` → `ScrollExhausted`
/// 4. `scroll_attempts >= max_scroll_attempts` → `MaxScrollAttempts`
/// 5. cancellation requested → `Cancelled`
/// 6. extraction or storage failure streak at its limit → `Error`
///
/// A limit of 0 disables its rule.
#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    limits: CrawlLimits,
}

impl TerminationPolicy {
    pub fn new(limits: CrawlLimits) -> Self {
        Self { limits }
    }

    pub fn evaluate(&self, state: &RunState, cancelled: bool) -> Verdict {
        let l = &self.limits;

        if l.max_records > 0 && state.new_count >= l.max_records {
            return Verdict::Stop(EndReason::TargetReached);
        }
        if l.duplicate_stop_threshold > 0
            && state.consecutive_persisted_duplicates >= l.duplicate_stop_threshold
        {
            return Verdict::Stop(EndReason::ConsecutiveDuplicates);
        }
        if l.max_ineffective_scrolls > 0
            && state.consecutive_ineffective_scrolls >= l.max_ineffective_scrolls
        {
            return Verdict::Stop(EndReason::ScrollExhausted);
        }
        if l.max_scroll_attempts > 0 && state.scroll_attempts >= l.max_scroll_attempts {
            return Verdict::Stop(EndReason::MaxScrollAttempts);
        }
        if cancelled {
            return Verdict::Stop(EndReason::Cancelled);
        }
        if self.extraction_exhausted(state) || self.storage_exhausted(state) {
            return Verdict::Stop(EndReason::Error);
        }
        Verdict::Continue
    }

    pub fn extraction_exhausted(&self, state: &RunState) -> bool {
        let max = self.limits.max_consecutive_extraction_failures;
        max > 0 && state.consecutive_extraction_failures >= max
    }

    pub fn storage_exhausted(&self, state: &RunState) -> bool {
        let max = self.limits.max_storage_outage_cycles;
        max > 0 && state.consecutive_storage_outages >= max
    }

    /// Whether the record quota is filled, so the rest of a frame can be ignored.
    pub fn quota_filled(&self, state: &RunState) -> bool {
        self.limits.max_records > 0 && state.new_count >= self.limits.max_records
    }
}
