//! Database context for managing the connection pool and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::jobs::DieselJobRepository;
use super::pool::{DbError, SqlitePool};
use super::records::DieselRecordRepository;

/// Entry point for database operations.
///
/// Create one context per command or engine, then use it to access the
/// repositories:
///
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:listcrawl.db");
/// ctx.init_schema().await?;
/// let total = ctx.records().count("list-42").await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: SqlitePool,
}

impl DbContext {
    /// Create a new database context from a file path.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: SqlitePool::from_path(db_path),
        }
    }

    /// Create a new database context from a `sqlite:` URL or plain path.
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: SqlitePool::new(database_url),
        }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn records(&self) -> DieselRecordRepository {
        DieselRecordRepository::new(self.pool.clone())
    }

    pub fn jobs(&self) -> DieselJobRepository {
        DieselJobRepository::new(self.pool.clone())
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                target_id TEXT NOT NULL,
                record_id TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                author_handle TEXT NOT NULL DEFAULT '',
                engagement_counters TEXT NOT NULL DEFAULT '{}',
                media_urls TEXT NOT NULL DEFAULT '[]',
                published_at BIGINT NOT NULL,
                scraped_at BIGINT NOT NULL,
                is_repost INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (target_id, record_id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_scraped
                ON records(target_id, scraped_at);

            CREATE TABLE IF NOT EXISTS crawl_jobs (
                job_id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                summary TEXT,
                error TEXT,
                host TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_status ON crawl_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_target ON crawl_jobs(target_id, started_at);
            "#,
        )
        .await
    }
}
