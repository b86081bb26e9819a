//! Diesel-based crawl job status repository.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use super::models::{CrawlJobRow, NewCrawlJob};
use super::pool::{DbError, SqlitePool};
use super::util::{parse_datetime, parse_datetime_opt};
use super::{JobStatusStore, PersistenceError};
use crate::models::{JobRun, JobRunStatus, TaskResult};
use crate::schema::crawl_jobs;

impl From<CrawlJobRow> for JobRun {
    fn from(row: CrawlJobRow) -> Self {
        JobRun {
            job_id: Uuid::parse_str(&row.job_id).unwrap_or_else(|_| Uuid::nil()),
            target_id: row.target_id,
            status: JobRunStatus::from_str(&row.status).unwrap_or(JobRunStatus::Failed),
            started_at: parse_datetime(&row.started_at),
            finished_at: parse_datetime_opt(row.finished_at),
            summary: row
                .summary
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            error: row.error,
            host: row.host,
        }
    }
}

#[derive(Clone)]
pub struct DieselJobRepository {
    pool: SqlitePool,
}

impl DieselJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert (or replace) a job row.
    pub async fn save(&self, run: &JobRun) -> Result<(), PersistenceError> {
        let job_id = run.job_id.to_string();
        let started_at = run.started_at.to_rfc3339();
        let finished_at = run.finished_at.map(|dt| dt.to_rfc3339());
        let summary = run.summary.as_ref().map(serde_json::to_string).transpose()?;
        let mut conn = self.pool.get().await?;

        diesel::replace_into(crawl_jobs::table)
            .values(&NewCrawlJob {
                job_id: &job_id,
                target_id: &run.target_id,
                status: run.status.as_str(),
                started_at: &started_at,
                finished_at: finished_at.as_deref(),
                summary: summary.as_deref(),
                error: run.error.as_deref(),
                host: run.host.as_deref(),
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<JobRun>, DbError> {
        let mut conn = self.pool.get().await?;

        crawl_jobs::table
            .find(job_id.to_string())
            .select(CrawlJobRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|row| row.map(JobRun::from))
    }

    /// Most recent jobs first, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<JobRunStatus>,
        limit: i64,
    ) -> Result<Vec<JobRun>, DbError> {
        let mut conn = self.pool.get().await?;

        let mut query = crawl_jobs::table
            .select(CrawlJobRow::as_select())
            .order(crawl_jobs::started_at.desc())
            .limit(limit)
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(crawl_jobs::status.eq(status.as_str()));
        }

        query
            .load(&mut conn)
            .await
            .map(|rows| rows.into_iter().map(JobRun::from).collect())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobRunStatus,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError> {
        let summary_json = serde_json::to_string(summary)?;
        let finished_at = summary.finished_at.to_rfc3339();
        let error = summary.error.as_ref().map(|e| e.message.as_str());
        let mut conn = self.pool.get().await?;

        let updated = diesel::update(crawl_jobs::table.find(job_id.to_string()))
            .set((
                crawl_jobs::status.eq(status.as_str()),
                crawl_jobs::finished_at.eq(Some(&finished_at)),
                crawl_jobs::summary.eq(Some(&summary_json)),
                crawl_jobs::error.eq(error),
            ))
            .execute(&mut conn)
            .await?;
        drop(conn);

        // The running row may never have been written if storage was down at start.
        if updated == 0 {
            let mut run = JobRun::started(job_id, &summary.target_id);
            run.started_at = summary.started_at;
            run.finish(summary);
            self.save(&run).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStatusStore for DieselJobRepository {
    async fn mark_running(&self, job_id: Uuid, target_id: &str) -> Result<(), PersistenceError> {
        self.save(&JobRun::started(job_id, target_id)).await
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError> {
        self.finish(job_id, JobRunStatus::Completed, summary).await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError> {
        self.finish(job_id, JobRunStatus::Failed, summary).await
    }

    async fn fail_orphaned(&self, reason: &str) -> Result<u64, PersistenceError> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(
            crawl_jobs::table.filter(crawl_jobs::status.eq(JobRunStatus::Running.as_str())),
        )
        .set((
            crawl_jobs::status.eq(JobRunStatus::Failed.as_str()),
            crawl_jobs::finished_at.eq(Some(&now)),
            crawl_jobs::error.eq(Some(reason)),
        ))
        .execute(&mut conn)
        .await?;

        Ok(rows as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndReason, TaskError};
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselJobRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.jobs(), dir)
    }

    fn result(job_id: Uuid, end_reason: EndReason) -> TaskResult {
        let mut result =
            TaskResult::aborted(job_id, "list-a", Utc::now(), TaskError::new("x", "y"));
        result.end_reason = end_reason;
        result.success = end_reason.is_success();
        if result.success {
            result.error = None;
        }
        result.new_count = 12;
        result
    }

    #[tokio::test]
    async fn test_lifecycle_completed() {
        let (repo, _dir) = setup_test_db().await;
        let job_id = Uuid::new_v4();

        repo.mark_running(job_id, "list-a").await.unwrap();
        let run = repo.get(job_id).await.unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Running);
        assert!(run.finished_at.is_none());

        repo.mark_completed(job_id, &result(job_id, EndReason::TargetReached))
            .await
            .unwrap();
        let run = repo.get(job_id).await.unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Completed);
        let summary = run.summary.unwrap();
        assert_eq!(summary.new_count, 12);
        assert_eq!(summary.end_reason, EndReason::TargetReached);
    }

    #[tokio::test]
    async fn test_failed_without_running_row_is_inserted() {
        let (repo, _dir) = setup_test_db().await;
        let job_id = Uuid::new_v4();

        repo.mark_failed(job_id, &result(job_id, EndReason::Error))
            .await
            .unwrap();

        let run = repo.get(job_id).await.unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_fail_orphaned_only_touches_running_rows() {
        let (repo, _dir) = setup_test_db().await;
        let done = Uuid::new_v4();
        repo.mark_running(done, "list-a").await.unwrap();
        repo.mark_completed(done, &result(done, EndReason::ScrollExhausted))
            .await
            .unwrap();
        repo.mark_running(Uuid::new_v4(), "list-b").await.unwrap();
        repo.mark_running(Uuid::new_v4(), "list-c").await.unwrap();

        assert_eq!(repo.fail_orphaned("process restarted").await.unwrap(), 2);
        assert_eq!(repo.fail_orphaned("again").await.unwrap(), 0);

        let failed = repo.list(Some(JobRunStatus::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .all(|r| r.error.as_deref() == Some("process restarted")));
        assert_eq!(
            repo.get(done).await.unwrap().unwrap().status,
            JobRunStatus::Completed
        );
    }
}
