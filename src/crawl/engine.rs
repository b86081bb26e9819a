//! Binds crawl requests to sessions and stores.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::job::{CrawlJob, CrawlRequest};
use super::state::JobProgress;
use crate::browser::{BandwidthPolicy, SessionFactory};
use crate::models::{TaskError, TaskResult};
use crate::repository::{JobStatusStore, RecordStore};

/// Runs one crawl request to completion.
///
/// The job manager is generic over this so it can be exercised without a
/// browser.
#[async_trait]
pub trait CrawlExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        job_id: Uuid,
        request: CrawlRequest,
        cancel: CancellationToken,
        progress: watch::Sender<JobProgress>,
    ) -> TaskResult;
}

/// Production executor: one `CrawlJob` per request over shared stores.
#[derive(Clone)]
pub struct CrawlEngine {
    sessions: Arc<dyn SessionFactory>,
    records: Arc<dyn RecordStore>,
    statuses: Arc<dyn JobStatusStore>,
    bandwidth: Option<BandwidthPolicy>,
}

impl CrawlEngine {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        records: Arc<dyn RecordStore>,
        statuses: Arc<dyn JobStatusStore>,
    ) -> Self {
        Self {
            sessions,
            records,
            statuses,
            bandwidth: None,
        }
    }

    pub fn with_bandwidth(mut self, policy: Option<BandwidthPolicy>) -> Self {
        self.bandwidth = policy;
        self
    }

    pub fn statuses(&self) -> Arc<dyn JobStatusStore> {
        self.statuses.clone()
    }
}

#[async_trait]
impl CrawlExecutor for CrawlEngine {
    async fn execute(
        &self,
        job_id: Uuid,
        request: CrawlRequest,
        cancel: CancellationToken,
        progress: watch::Sender<JobProgress>,
    ) -> TaskResult {
        let target_id = request.target_id.clone();
        let started_at = Utc::now();

        let job = CrawlJob::new(
            job_id,
            request,
            self.sessions.clone(),
            self.records.clone(),
            self.statuses.clone(),
        )
        .with_bandwidth(self.bandwidth.clone())
        .with_cancellation(cancel)
        .with_progress(progress)
        .run();

        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Job {} for {} panicked: {}", job_id, target_id, message);
                let result = TaskResult::aborted(
                    job_id,
                    &target_id,
                    started_at,
                    TaskError::new("job_panicked", message),
                );
                if let Err(e) = self.statuses.mark_failed(job_id, &result).await {
                    warn!("Failed to record job result: {}", e);
                }
                result
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
