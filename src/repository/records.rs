//! Diesel-based record repository for SQLite.

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewRecord, RecordRow};
use super::pool::{DbError, SqlitePool};
use super::{PersistenceError, RecordStore};
use crate::models::Record;
use crate::schema::records;

/// Convert a database row to a domain model.
impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Record {
            id: row.record_id,
            content: row.content,
            author_handle: row.author_handle,
            engagement_counters: serde_json::from_str(&row.engagement_counters)
                .unwrap_or_default(),
            media_urls: serde_json::from_str(&row.media_urls).unwrap_or_default(),
            published_at: row.published_at,
            source_target_id: row.target_id,
            scraped_at: row.scraped_at,
            is_repost: row.is_repost != 0,
        }
    }
}

#[derive(Clone)]
pub struct DieselRecordRepository {
    pool: SqlitePool,
}

impl DieselRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check whether a record has been stored for a target.
    pub async fn contains(&self, target_id: &str, record_id: &str) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = records::table
            .filter(records::target_id.eq(target_id))
            .filter(records::record_id.eq(record_id))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count > 0)
    }

    /// Insert a record, or refresh content and counters when it already exists.
    pub async fn save(&self, record: &Record) -> Result<bool, PersistenceError> {
        let counters = serde_json::to_string(&record.engagement_counters)?;
        let media = serde_json::to_string(&record.media_urls)?;
        let mut conn = self.pool.get().await?;

        let inserted = diesel::insert_or_ignore_into(records::table)
            .values(&NewRecord {
                target_id: &record.source_target_id,
                record_id: &record.id,
                content: &record.content,
                author_handle: &record.author_handle,
                engagement_counters: &counters,
                media_urls: &media,
                published_at: record.published_at,
                scraped_at: record.scraped_at,
                is_repost: record.is_repost as i32,
            })
            .execute(&mut conn)
            .await?;

        if inserted == 0 {
            diesel::update(
                records::table
                    .filter(records::target_id.eq(&record.source_target_id))
                    .filter(records::record_id.eq(&record.id)),
            )
            .set((
                records::content.eq(&record.content),
                records::engagement_counters.eq(&counters),
                records::media_urls.eq(&media),
                records::scraped_at.eq(record.scraped_at),
            ))
            .execute(&mut conn)
            .await?;
        }

        Ok(inserted > 0)
    }

    /// Number of records stored for a target.
    pub async fn count(&self, target_id: &str) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;

        records::table
            .filter(records::target_id.eq(target_id))
            .select(count_star())
            .first(&mut conn)
            .await
    }

    /// Most recently scraped records of a target.
    pub async fn recent(&self, target_id: &str, limit: i64) -> Result<Vec<Record>, DbError> {
        let mut conn = self.pool.get().await?;

        records::table
            .filter(records::target_id.eq(target_id))
            .order((records::scraped_at.desc(), records::published_at.desc()))
            .limit(limit)
            .select(RecordRow::as_select())
            .load(&mut conn)
            .await
            .map(|rows| rows.into_iter().map(Record::from).collect())
    }

    /// Stored record count per target.
    pub async fn totals(&self) -> Result<Vec<(String, i64)>, DbError> {
        let mut conn = self.pool.get().await?;

        records::table
            .group_by(records::target_id)
            .select((records::target_id, count_star()))
            .order(records::target_id.asc())
            .load(&mut conn)
            .await
    }
}

#[async_trait]
impl RecordStore for DieselRecordRepository {
    async fn exists(&self, id: &str, target_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.contains(target_id, id).await?)
    }

    async fn upsert(&self, record: &Record) -> Result<bool, PersistenceError> {
        self.save(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselRecordRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::new(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.records(), dir)
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let (repo, _dir) = setup_test_db().await;

        let record = Record::new("1001", "list-a")
            .with_content("hello")
            .with_counter("likes", 3)
            .with_media("https://cdn.example.com/a.jpg");
        assert!(repo.upsert(&record).await.unwrap());
        assert!(repo.exists("1001", "list-a").await.unwrap());

        let refreshed = record.clone().with_counter("likes", 40);
        assert!(!repo.upsert(&refreshed).await.unwrap());

        let stored = repo.recent("list-a", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].engagement_counters["likes"], 40);
        assert_eq!(stored[0].media_urls, record.media_urls);
        assert_eq!(stored[0].published_at, record.published_at);
    }

    #[tokio::test]
    async fn test_existence_is_scoped_by_target() {
        let (repo, _dir) = setup_test_db().await;

        repo.upsert(&Record::new("7", "list-a")).await.unwrap();

        assert!(repo.exists("7", "list-a").await.unwrap());
        assert!(!repo.exists("7", "list-b").await.unwrap());
        assert!(!repo.exists("8", "list-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_large_timestamps_roundtrip() {
        let (repo, _dir) = setup_test_db().await;

        let ts: i64 = 16_725_225_600_123;
        repo.upsert(&Record::new("1", "list-a").with_published_at(ts).as_repost())
            .await
            .unwrap();

        let stored = repo.recent("list-a", 1).await.unwrap();
        assert_eq!(stored[0].published_at, ts);
        assert!(stored[0].is_repost);
    }

    #[tokio::test]
    async fn test_counts_and_totals() {
        let (repo, _dir) = setup_test_db().await;

        for id in ["1", "2", "3"] {
            repo.upsert(&Record::new(id, "list-a")).await.unwrap();
        }
        repo.upsert(&Record::new("1", "list-b")).await.unwrap();

        assert_eq!(repo.count("list-a").await.unwrap(), 3);
        assert_eq!(
            repo.totals().await.unwrap(),
            vec![("list-a".to_string(), 3), ("list-b".to_string(), 1)]
        );
    }
}
