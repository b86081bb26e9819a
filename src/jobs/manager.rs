//! Exclusivity slots and the job registry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::ExclusivityError;
use crate::crawl::{CrawlExecutor, CrawlRequest, JobProgress};
use crate::models::{TaskError, TaskResult};

/// Finished results kept for `status`/`wait` after a job leaves its slot.
const FINISHED_RETENTION: usize = 256;

/// Non-blocking view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Running {
        target_id: String,
        started_at: DateTime<Utc>,
        progress: JobProgress,
    },
    Finished(TaskResult),
}

/// Summary of an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningJob {
    pub job_id: Uuid,
    pub target_id: String,
    pub started_at: DateTime<Utc>,
}

struct ActiveJob {
    target_id: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    progress: watch::Receiver<JobProgress>,
    done: watch::Receiver<Option<TaskResult>>,
}

#[derive(Default)]
struct Registry {
    /// target_id -> job holding the slot.
    slots: HashMap<String, Uuid>,
    active: HashMap<Uuid, ActiveJob>,
    finished: HashMap<Uuid, TaskResult>,
    finished_order: VecDeque<Uuid>,
}

impl Registry {
    /// Free the slot if it still belongs to `job_id`; `force_reset` may have
    /// handed it to a newer job.
    fn release(&mut self, target_id: &str, job_id: Uuid) {
        if self.slots.get(target_id) == Some(&job_id) {
            self.slots.remove(target_id);
        }
        self.active.remove(&job_id);
    }

    fn retain_result(&mut self, result: TaskResult) {
        let job_id = result.job_id;
        if self.finished.insert(job_id, result).is_none() {
            self.finished_order.push_back(job_id);
        }
        while self.finished_order.len() > FINISHED_RETENTION {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // Critical sections never panic mid-update, so a poisoned map is still consistent.
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Releases a job's slot when dropped, so a supervisor that is itself torn
/// down (runtime shutdown) still frees the target.
struct SlotGuard {
    registry: Arc<Mutex<Registry>>,
    target_id: String,
    job_id: Uuid,
    released: bool,
}

impl SlotGuard {
    /// Free the slot and retain the result in one critical section.
    fn complete(mut self, result: TaskResult) {
        let mut registry = lock(&self.registry);
        registry.release(&self.target_id, self.job_id);
        registry.retain_result(result);
        self.released = true;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Job {} for {} ended without a result; releasing slot",
                self.job_id, self.target_id
            );
            lock(&self.registry).release(&self.target_id, self.job_id);
        }
    }
}

/// Owns the slot map. Submitting a job spawns it on the tokio runtime; the
/// slot is freed the moment the job produces its result (or dies trying).
pub struct JobExclusivityManager {
    executor: Arc<dyn CrawlExecutor>,
    pool_size: usize,
    registry: Arc<Mutex<Registry>>,
}

impl JobExclusivityManager {
    /// `pool_size` is the number of jobs allowed to run at once (at least 1).
    pub fn new(executor: Arc<dyn CrawlExecutor>, pool_size: usize) -> Self {
        Self {
            executor,
            pool_size: pool_size.max(1),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Start a crawl for `request.target_id`.
    ///
    /// Fails with `Conflict` if the target already has a running job and
    /// with `AtCapacity` if the pool is full. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, request: CrawlRequest) -> Result<Uuid, ExclusivityError> {
        let target_id = request.target_id.clone();
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(JobProgress::default());
        let (done_tx, done_rx) = watch::channel(None);

        {
            let mut registry = lock(&self.registry);
            if let Some(existing) = registry.slots.get(&target_id) {
                return Err(ExclusivityError::Conflict {
                    target_id,
                    job_id: *existing,
                });
            }
            if registry.slots.len() >= self.pool_size {
                return Err(ExclusivityError::AtCapacity {
                    limit: self.pool_size,
                });
            }
            registry.slots.insert(target_id.clone(), job_id);
            registry.active.insert(
                job_id,
                ActiveJob {
                    target_id: target_id.clone(),
                    started_at,
                    cancel: cancel.clone(),
                    progress: progress_rx,
                    done: done_rx,
                },
            );
        }

        info!("Submitted job {} for {}", job_id, target_id);

        let guard = SlotGuard {
            registry: self.registry.clone(),
            target_id: target_id.clone(),
            job_id,
            released: false,
        };
        let executor = self.executor.clone();
        let worker = tokio::spawn(async move {
            executor
                .execute(job_id, request, cancel, progress_tx)
                .await
        });

        tokio::spawn(async move {
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    let code = if e.is_panic() {
                        "job_panicked"
                    } else {
                        "job_aborted"
                    };
                    error!("Job {} for {} died: {}", job_id, target_id, e);
                    TaskResult::aborted(
                        job_id,
                        &target_id,
                        started_at,
                        TaskError::new(code, e.to_string()),
                    )
                }
            };
            guard.complete(result.clone());
            done_tx.send_replace(Some(result));
        });

        Ok(job_id)
    }

    /// Request cooperative cancellation. The job observes it at its next
    /// cycle boundary or while settling.
    pub fn cancel(&self, job_id: Uuid) -> Result<(), ExclusivityError> {
        let registry = lock(&self.registry);
        let job = registry
            .active
            .get(&job_id)
            .ok_or(ExclusivityError::NotFound(job_id))?;
        info!("Cancelling job {} for {}", job_id, job.target_id);
        job.cancel.cancel();
        Ok(())
    }

    /// Cancel every running job; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let registry = lock(&self.registry);
        for job in registry.active.values() {
            job.cancel.cancel();
        }
        registry.active.len()
    }

    pub fn status(&self, job_id: Uuid) -> Result<JobStatus, ExclusivityError> {
        let registry = lock(&self.registry);
        if let Some(job) = registry.active.get(&job_id) {
            return Ok(JobStatus::Running {
                target_id: job.target_id.clone(),
                started_at: job.started_at,
                progress: job.progress.borrow().clone(),
            });
        }
        registry
            .finished
            .get(&job_id)
            .cloned()
            .map(JobStatus::Finished)
            .ok_or(ExclusivityError::NotFound(job_id))
    }

    /// Wait for a job's result.
    pub async fn wait(&self, job_id: Uuid) -> Result<TaskResult, ExclusivityError> {
        let mut done = {
            let registry = lock(&self.registry);
            if let Some(result) = registry.finished.get(&job_id) {
                return Ok(result.clone());
            }
            registry
                .active
                .get(&job_id)
                .map(|job| job.done.clone())
                .ok_or(ExclusivityError::NotFound(job_id))?
        };

        if let Ok(result) = done.wait_for(Option::is_some).await {
            if let Some(ref result) = *result {
                return Ok(result.clone());
            }
        }
        // Supervisor went away without broadcasting.
        lock(&self.registry)
            .finished
            .get(&job_id)
            .cloned()
            .ok_or(ExclusivityError::NotFound(job_id))
    }

    /// Jobs currently holding a slot, oldest first.
    pub fn running(&self) -> Vec<RunningJob> {
        let registry = lock(&self.registry);
        let mut jobs: Vec<RunningJob> = registry
            .active
            .iter()
            .map(|(job_id, job)| RunningJob {
                job_id: *job_id,
                target_id: job.target_id.clone(),
                started_at: job.started_at,
            })
            .collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Drop every slot unconditionally and signal the jobs that held them.
    ///
    /// Use after a crash left slots in an unknown state; follow with
    /// `JobStatusStore::fail_orphaned` to repair the durable mirror.
    pub fn force_reset(&self) -> usize {
        let mut registry = lock(&self.registry);
        let count = registry.slots.len();
        for job in registry.active.values() {
            job.cancel.cancel();
        }
        registry.slots.clear();
        registry.active.clear();
        warn!("Force reset cleared {} job slots", count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Viewport;
    use crate::extract::{ExtractionError, Extractor};
    use crate::models::{EndReason, Record};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoRecords;

    impl Extractor for NoRecords {
        fn name(&self) -> &str {
            "none"
        }
        fn read(&self, _v: &Viewport, _t: &str) -> Result<Vec<Record>, ExtractionError> {
            Ok(Vec::new())
        }
    }

    /// Runs until cancelled, except for targets named `quick*` (finish at
    /// once) and `panic*` (panic).
    struct FakeExecutor;

    #[async_trait]
    impl CrawlExecutor for FakeExecutor {
        async fn execute(
            &self,
            job_id: Uuid,
            request: CrawlRequest,
            cancel: CancellationToken,
            progress: watch::Sender<JobProgress>,
        ) -> TaskResult {
            let started_at = Utc::now();
            if request.target_id.starts_with("panic") {
                panic!("extractor exploded");
            }
            let reason = if request.target_id.starts_with("quick") {
                EndReason::TargetReached
            } else {
                progress.send_replace(JobProgress {
                    new_count: 7,
                    ..Default::default()
                });
                cancel.cancelled().await;
                EndReason::Cancelled
            };
            let mut result = TaskResult::aborted(
                job_id,
                &request.target_id,
                started_at,
                TaskError::new("", ""),
            );
            result.end_reason = reason;
            result.success = reason.is_success();
            result.error = None;
            result
        }
    }

    fn manager(pool_size: usize) -> JobExclusivityManager {
        JobExclusivityManager::new(Arc::new(FakeExecutor), pool_size)
    }

    fn request(target: &str) -> CrawlRequest {
        CrawlRequest::new(target, "https://example.com", Arc::new(NoRecords))
    }

    #[tokio::test]
    async fn test_second_submit_for_target_conflicts() {
        let manager = manager(4);
        let first = manager.submit(request("list-a")).unwrap();

        let err = manager.submit(request("list-a")).unwrap_err();
        assert_eq!(
            err,
            ExclusivityError::Conflict {
                target_id: "list-a".to_string(),
                job_id: first
            }
        );

        // Other targets are unaffected.
        manager.submit(request("list-b")).unwrap();
        assert_eq!(manager.running().len(), 2);
        manager.cancel_all();
    }

    #[tokio::test]
    async fn test_slot_is_free_after_termination() {
        let manager = manager(4);
        let first = manager.submit(request("list-a")).unwrap();
        manager.cancel(first).unwrap();

        let result = manager.wait(first).await.unwrap();
        assert_eq!(result.end_reason, EndReason::Cancelled);
        assert!(manager.running().is_empty());

        let third = manager.submit(request("list-a")).unwrap();
        assert_ne!(third, first);
        manager.cancel(third).unwrap();
    }

    #[tokio::test]
    async fn test_pool_capacity() {
        let manager = manager(1);
        manager.submit(request("list-a")).unwrap();
        assert_eq!(
            manager.submit(request("list-b")).unwrap_err(),
            ExclusivityError::AtCapacity { limit: 1 }
        );
        manager.cancel_all();
    }

    #[tokio::test]
    async fn test_status_reports_progress_then_result() {
        let manager = manager(2);
        let job = manager.submit(request("list-a")).unwrap();

        // Give the executor a moment to publish progress.
        let mut seen = false;
        for _ in 0..50 {
            if let JobStatus::Running { progress, .. } = manager.status(job).unwrap() {
                if progress.new_count == 7 {
                    seen = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen);

        manager.cancel(job).unwrap();
        manager.wait(job).await.unwrap();
        assert!(matches!(
            manager.status(job).unwrap(),
            JobStatus::Finished(TaskResult {
                end_reason: EndReason::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_panicking_job_releases_slot() {
        let manager = manager(2);
        let job = manager.submit(request("panic-a")).unwrap();

        let result = manager.wait(job).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.end_reason, EndReason::Error);
        assert_eq!(result.error.unwrap().code, "job_panicked");

        assert!(manager.running().is_empty());
        manager.submit(request("panic-a")).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let manager = manager(1);
        let id = Uuid::new_v4();
        assert_eq!(manager.cancel(id), Err(ExclusivityError::NotFound(id)));
        assert_eq!(manager.status(id).unwrap_err(), ExclusivityError::NotFound(id));
        assert_eq!(manager.wait(id).await.unwrap_err(), ExclusivityError::NotFound(id));
    }

    #[tokio::test]
    async fn test_force_reset_frees_slots_and_ignores_stale_release() {
        let manager = manager(2);
        let old = manager.submit(request("list-a")).unwrap();

        assert_eq!(manager.force_reset(), 1);
        assert!(manager.running().is_empty());

        // A new job takes the slot before the old one finishes unwinding.
        let new = manager.submit(request("list-a")).unwrap();

        // Let the cancelled old job complete and run its guard.
        for _ in 0..50 {
            if manager.status(old).is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(manager.status(old), Ok(JobStatus::Finished(_))));

        // The new job still owns the target.
        assert!(matches!(
            manager.submit(request("list-a")),
            Err(ExclusivityError::Conflict { job_id, .. }) if job_id == new
        ));
        manager.cancel(new).unwrap();
    }

    #[tokio::test]
    async fn test_quick_job_result_is_retained() {
        let manager = manager(1);
        let job = manager.submit(request("quick-a")).unwrap();
        let result = manager.wait(job).await.unwrap();
        assert!(result.success);
        // Waiting again is served from the retained results.
        assert_eq!(manager.wait(job).await.unwrap(), result);
    }
}
