//! In-memory stores.
//!
//! Used for `--dry-run` crawls and by tests. Both stores support fault
//! injection so outage handling can be exercised without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStatusStore, PersistenceError, RecordStore};
use crate::models::{JobRun, JobRunStatus, Record, TaskResult};

fn unavailable() -> PersistenceError {
    PersistenceError::Unavailable("in-memory store marked unavailable".to_string())
}

/// Records keyed by `(target_id, record_id)`.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<(String, String), Record>>,
    unavailable: AtomicBool,
    failing_upserts: AtomicU32,
    lookups: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate as if an earlier run had persisted these records.
    pub async fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut map = self.records.write().await;
        for record in records {
            map.insert((record.source_target_id.clone(), record.id.clone()), record);
        }
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` upserts.
    pub fn fail_next_upserts(&self, n: u32) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Number of `exists` calls served (including failed ones).
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, target_id: &str, record_id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .get(&(target_id.to_string(), record_id.to_string()))
            .cloned()
    }

    /// Stored ids of one target, sorted.
    pub async fn ids(&self, target_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .await
            .keys()
            .filter(|(target, _)| target == target_id)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn exists(&self, id: &str, target_id: &str) -> Result<bool, PersistenceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .records
            .read()
            .await
            .contains_key(&(target_id.to_string(), id.to_string())))
    }

    async fn upsert(&self, record: &Record) -> Result<bool, PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let failed = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PersistenceError::Unavailable("injected upsert failure".to_string()));
        }

        let key = (record.source_target_id.clone(), record.id.clone());
        Ok(self.records.write().await.insert(key, record.clone()).is_none())
    }
}

/// Job status rows keyed by job id.
#[derive(Default)]
pub struct InMemoryJobStore {
    runs: RwLock<HashMap<Uuid, JobRun>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, job_id: Uuid) -> Option<JobRun> {
        self.runs.read().await.get(&job_id).cloned()
    }

    pub async fn all(&self) -> Vec<JobRun> {
        let mut runs: Vec<JobRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    async fn finish(&self, job_id: Uuid, summary: &TaskResult) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut runs = self.runs.write().await;
        let run = runs.entry(job_id).or_insert_with(|| {
            let mut run = JobRun::started(job_id, &summary.target_id);
            run.started_at = summary.started_at;
            run
        });
        run.finish(summary);
        Ok(())
    }
}

#[async_trait]
impl JobStatusStore for InMemoryJobStore {
    async fn mark_running(&self, job_id: Uuid, target_id: &str) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.runs
            .write()
            .await
            .insert(job_id, JobRun::started(job_id, target_id));
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError> {
        self.finish(job_id, summary).await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError> {
        self.finish(job_id, summary).await
    }

    async fn fail_orphaned(&self, reason: &str) -> Result<u64, PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let now = Utc::now();
        let mut count = 0;
        for run in self.runs.write().await.values_mut() {
            if run.status == JobRunStatus::Running {
                run.status = JobRunStatus::Failed;
                run.finished_at = Some(now);
                run.error = Some(reason.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_reports_new_inserts() {
        let store = InMemoryRecordStore::new();
        let record = Record::new("1", "list-a");

        assert!(store.upsert(&record).await.unwrap());
        assert!(!store.upsert(&record).await.unwrap());
        assert!(store.exists("1", "list-a").await.unwrap());
        assert!(!store.exists("1", "list-b").await.unwrap());
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_injected_upsert_failures_are_consumed() {
        let store = InMemoryRecordStore::new();
        store.fail_next_upserts(2);

        let record = Record::new("1", "list-a");
        assert!(store.upsert(&record).await.is_err());
        assert!(store.upsert(&record).await.is_err());
        assert!(store.upsert(&record).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.exists("1", "list-a").await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert!(store.upsert(&Record::new("1", "list-a")).await.is_err());

        store.set_unavailable(false);
        assert!(store.upsert(&Record::new("1", "list-a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_job_store_orphan_sweep() {
        let store = InMemoryJobStore::new();
        let a = Uuid::new_v4();
        store.mark_running(a, "list-a").await.unwrap();
        store.mark_running(Uuid::new_v4(), "list-b").await.unwrap();

        assert_eq!(store.fail_orphaned("restart").await.unwrap(), 2);
        let run = store.get(a).await.unwrap();
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("restart"));
    }
}
