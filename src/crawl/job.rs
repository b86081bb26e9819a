//! The crawl loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::ledger::{Classification, DedupLedger};
use super::limits::CrawlLimits;
use super::scroll::ScrollDriver;
use super::state::{JobProgress, RunState};
use super::termination::{TerminationPolicy, Verdict};
use crate::browser::{AuthState, BandwidthPolicy, LoadMore, Session, SessionFactory};
use crate::extract::Extractor;
use crate::models::{EndReason, Record, TaskError, TaskResult};
use crate::repository::{JobStatusStore, PersistenceError, RecordStore};

/// Everything needed to crawl one target once.
#[derive(Clone)]
pub struct CrawlRequest {
    pub target_id: String,
    pub url: String,
    pub limits: CrawlLimits,
    pub load_more: LoadMore,
    pub auth_state: Option<AuthState>,
    pub extractor: Arc<dyn Extractor>,
}

impl CrawlRequest {
    pub fn new(
        target_id: impl Into<String>,
        url: impl Into<String>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            limits: CrawlLimits::default(),
            load_more: LoadMore::default(),
            auth_state: None,
            extractor,
        }
    }

    pub fn with_limits(mut self, limits: CrawlLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_load_more(mut self, load_more: LoadMore) -> Self {
        self.load_more = load_more;
        self
    }

    pub fn with_auth_state(mut self, auth_state: AuthState) -> Self {
        self.auth_state = Some(auth_state);
        self
    }
}

impl std::fmt::Debug for CrawlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlRequest")
            .field("target_id", &self.target_id)
            .field("url", &self.url)
            .field("limits", &self.limits)
            .field("load_more", &self.load_more)
            .field("auth_state", &self.auth_state)
            .field("extractor", &self.extractor.name())
            .finish()
    }
}

/// Last failure seen per concern, reported if its streak ends the run.
#[derive(Default)]
struct Failures {
    extraction: Option<TaskError>,
    storage: Option<TaskError>,
}

/// One crawl run. Owns its run state and session; produces exactly one
/// `TaskResult`.
pub struct CrawlJob {
    job_id: Uuid,
    request: CrawlRequest,
    sessions: Arc<dyn SessionFactory>,
    records: Arc<dyn RecordStore>,
    statuses: Arc<dyn JobStatusStore>,
    bandwidth: Option<BandwidthPolicy>,
    cancel: CancellationToken,
    progress: Option<watch::Sender<JobProgress>>,
    policy: TerminationPolicy,
}

impl CrawlJob {
    pub fn new(
        job_id: Uuid,
        request: CrawlRequest,
        sessions: Arc<dyn SessionFactory>,
        records: Arc<dyn RecordStore>,
        statuses: Arc<dyn JobStatusStore>,
    ) -> Self {
        let policy = TerminationPolicy::new(request.limits.clone());
        Self {
            job_id,
            request,
            sessions,
            records,
            statuses,
            bandwidth: None,
            cancel: CancellationToken::new(),
            progress: None,
            policy,
        }
    }

    pub fn with_bandwidth(mut self, policy: Option<BandwidthPolicy>) -> Self {
        self.bandwidth = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, tx: watch::Sender<JobProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Drive the crawl to a terminal state. Never fails: every outcome,
    /// including errors, is reported in the returned result.
    pub async fn run(self) -> TaskResult {
        let span = info_span!(
            "crawl",
            job_id = %self.job_id,
            target_id = %self.request.target_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> TaskResult {
        let mut state = RunState::new(self.request.target_id.clone());
        info!("Starting crawl of {}", self.request.url);

        if let Err(e) = self
            .statuses
            .mark_running(self.job_id, &self.request.target_id)
            .await
        {
            warn!("Failed to record job start: {}", e);
        }

        let deadline = self.request.limits.max_duration().map(|d| Instant::now() + d);

        let error = match within(deadline, self.sessions.open(self.request.auth_state.as_ref()))
            .await
        {
            None => {
                state.finish(EndReason::Timeout);
                None
            }
            Some(Err(e)) => {
                state.finish(EndReason::Error);
                Some(TaskError::new(e.code(), e.to_string()))
            }
            Some(Ok(mut session)) => {
                let error = self.drive(session.as_mut(), &mut state, deadline).await;
                if let Err(e) = session.close().await {
                    warn!("Failed to close session: {}", e);
                }
                error
            }
        };

        let result = self.summarize(&state, error);
        self.publish(&state);

        let mirrored = if result.success {
            self.statuses.mark_completed(self.job_id, &result).await
        } else {
            self.statuses.mark_failed(self.job_id, &result).await
        };
        if let Err(e) = mirrored {
            warn!("Failed to record job result: {}", e);
        }

        match result.error {
            Some(ref e) if result.end_reason == EndReason::Error => {
                error!("Crawl failed: {} ({})", e.message, e.code)
            }
            _ => info!(
                "Crawl finished: {} (new={}, local_dups={}, persisted_dups={}, skipped={}, {}ms)",
                result.end_reason,
                result.new_count,
                result.task_local_duplicate_count,
                result.persisted_duplicate_count,
                result.skipped_count,
                result.execution_time_ms
            ),
        }
        result
    }

    /// Navigate and loop until a terminal state is set on `state`.
    /// Returns the cause when the run ends in `ERROR`.
    async fn drive(
        &self,
        session: &mut dyn Session,
        state: &mut RunState,
        deadline: Option<Instant>,
    ) -> Option<TaskError> {
        if let Some(policy) = self.bandwidth.clone() {
            if let Err(e) = session.intercept_requests(policy).await {
                state.finish(EndReason::Error);
                return Some(TaskError::new(e.code(), e.to_string()));
            }
        }

        match within(deadline, session.navigate(&self.request.url)).await {
            None => {
                state.finish(EndReason::Timeout);
                return None;
            }
            Some(Err(e)) => {
                state.finish(EndReason::Error);
                return Some(TaskError::new(e.code(), e.to_string()));
            }
            Some(Ok(())) => {}
        }

        let limits = &self.request.limits;
        let mut ledger = DedupLedger::new(self.request.target_id.clone(), self.records.clone());
        let mut driver = ScrollDriver::new(
            self.request.load_more.clone(),
            limits.min_scroll_distance_px,
        );
        let mut failures = Failures::default();

        loop {
            if self.cancel.is_cancelled() {
                state.finish(EndReason::Cancelled);
                return None;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                state.finish(EndReason::Timeout);
                return None;
            }

            match within(
                deadline,
                self.cycle(session, state, &mut ledger, &mut failures),
            )
            .await
            {
                None => {
                    state.finish(EndReason::Timeout);
                    return None;
                }
                Some(Err(e)) => {
                    state.finish(EndReason::Error);
                    return Some(TaskError::new(e.code(), e.to_string()));
                }
                Some(Ok(())) => {}
            }
            state.cycles += 1;
            self.publish(state);

            if let Verdict::Stop(reason) = self.policy.evaluate(state, self.cancel.is_cancelled())
            {
                state.finish(reason);
                if reason != EndReason::Error {
                    return None;
                }
                return if self.policy.extraction_exhausted(state) {
                    failures.extraction
                } else {
                    failures.storage
                };
            }

            let advanced = within(deadline, driver.advance(session)).await;
            state.scroll_attempts = driver.attempts();
            match advanced {
                None => {
                    state.finish(EndReason::Timeout);
                    return None;
                }
                Some(Err(e)) => {
                    state.finish(EndReason::Error);
                    return Some(TaskError::new(e.code(), e.to_string()));
                }
                Some(Ok(report)) if report.is_effective => {
                    state.consecutive_ineffective_scrolls = 0;
                }
                Some(Ok(_)) => {
                    state.consecutive_ineffective_scrolls += 1;
                }
            }

            let mut settle = Instant::now() + limits.settle_delay();
            if let Some(d) = deadline {
                settle = settle.min(d);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    state.finish(EndReason::Cancelled);
                    return None;
                }
                _ = tokio::time::sleep_until(settle) => {}
            }
        }
    }

    /// Extract the current frame and account for every record in it.
    async fn cycle(
        &self,
        session: &mut dyn Session,
        state: &mut RunState,
        ledger: &mut DedupLedger,
        failures: &mut Failures,
    ) -> Result<(), crate::browser::SessionError> {
        let viewport = session.viewport().await?;
        let records = match self.request.extractor.read(&viewport, &self.request.target_id) {
            Ok(records) => {
                state.consecutive_extraction_failures = 0;
                records
            }
            Err(e) => {
                state.consecutive_extraction_failures += 1;
                warn!(
                    "Extraction failed ({} in a row): {}",
                    state.consecutive_extraction_failures, e
                );
                failures.extraction = Some(TaskError::new(e.code(), e.to_string()));
                return Ok(());
            }
        };
        debug!(
            "Cycle {}: {} records in view",
            state.cycles + 1,
            records.len()
        );

        let limits = &self.request.limits;
        let mut storage_ops = 0u32;
        let mut storage_failures = 0u32;
        let mut saw_new = false;

        for record in records {
            if self.policy.quota_filled(state) {
                break;
            }

            if limits.skip_reposts && record.is_repost {
                if ledger.observe(&record.id) {
                    state.skipped_count += 1;
                } else {
                    state.task_local_duplicate_count += 1;
                }
                continue;
            }

            storage_ops += 1;
            let classification = match ledger.classify(&record.id).await {
                Ok(c) => c,
                Err(e) => {
                    storage_failures += 1;
                    warn!("Lookup for record {} failed: {}", record.id, e);
                    failures.storage = Some(storage_error(&e));
                    continue;
                }
            };

            match classification {
                Classification::TaskLocal => {
                    state.task_local_duplicate_count += 1;
                }
                Classification::Persisted => {
                    state.persisted_duplicate_count += 1;
                    state.consecutive_persisted_duplicates += 1;
                }
                Classification::New => {
                    saw_new = true;
                    storage_ops += 1;
                    match self.persist(&record).await {
                        Ok(_) => state.new_count += 1,
                        Err(e) => {
                            storage_failures += 1;
                            state.skipped_count += 1;
                            warn!("Failed to persist record {}: {}", record.id, e);
                            failures.storage = Some(storage_error(&e));
                        }
                    }
                }
            }
        }

        // Any new record in the frame clears the streak for the whole cycle.
        if saw_new {
            state.consecutive_persisted_duplicates = 0;
        }

        if storage_ops > 0 && storage_failures == storage_ops {
            state.consecutive_storage_outages += 1;
        } else if storage_ops > 0 {
            state.consecutive_storage_outages = 0;
        }
        Ok(())
    }

    async fn persist(&self, record: &Record) -> Result<bool, PersistenceError> {
        let retries = self.request.limits.persist_retries;
        let mut attempt = 0;
        loop {
            match self.records.upsert(record).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    debug!("Upsert of {} failed (attempt {}): {}", record.id, attempt, e);
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish(&self, state: &RunState) {
        if let Some(ref tx) = self.progress {
            tx.send_replace(state.progress());
        }
    }

    fn summarize(&self, state: &RunState, error: Option<TaskError>) -> TaskResult {
        let end_reason = state.end_reason().unwrap_or(EndReason::Error);
        let error = match end_reason {
            EndReason::Error => Some(
                error.unwrap_or_else(|| TaskError::new("internal", "crawl ended without a cause")),
            ),
            EndReason::Timeout => Some(TaskError::new(
                "timeout",
                format!(
                    "exceeded max duration of {}s",
                    self.request.limits.max_duration_secs
                ),
            )),
            _ => None,
        };

        TaskResult {
            job_id: self.job_id,
            target_id: self.request.target_id.clone(),
            success: end_reason.is_success(),
            end_reason,
            new_count: state.new_count,
            task_local_duplicate_count: state.task_local_duplicate_count,
            persisted_duplicate_count: state.persisted_duplicate_count,
            skipped_count: state.skipped_count,
            scroll_attempts: state.scroll_attempts,
            cycles: state.cycles,
            execution_time_ms: state.started.elapsed().as_micros().div_ceil(1000) as u64,
            started_at: state.started_at,
            finished_at: Utc::now(),
            error,
        }
    }
}

fn storage_error(e: &PersistenceError) -> TaskError {
    TaskError::new("storage_unavailable", e.to_string())
}

/// Await `fut`, giving up at `deadline`.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(d) => tokio::time::timeout_at(d, fut).await.ok(),
        None => Some(fut.await),
    }
}
