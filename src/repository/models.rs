//! Diesel row types.

use diesel::prelude::*;

use crate::schema;

/// Stored record row.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RecordRow {
    pub target_id: String,
    pub record_id: String,
    pub content: String,
    pub author_handle: String,
    pub engagement_counters: String,
    pub media_urls: String,
    pub published_at: i64,
    pub scraped_at: i64,
    pub is_repost: i32,
}

/// New record for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::records)]
pub struct NewRecord<'a> {
    pub target_id: &'a str,
    pub record_id: &'a str,
    pub content: &'a str,
    pub author_handle: &'a str,
    pub engagement_counters: &'a str,
    pub media_urls: &'a str,
    pub published_at: i64,
    pub scraped_at: i64,
    pub is_repost: i32,
}

/// Crawl job row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::crawl_jobs)]
#[diesel(primary_key(job_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CrawlJobRow {
    pub job_id: String,
    pub target_id: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub host: Option<String>,
}

/// New crawl job for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::crawl_jobs)]
pub struct NewCrawlJob<'a> {
    pub job_id: &'a str,
    pub target_id: &'a str,
    pub status: &'a str,
    pub started_at: &'a str,
    pub finished_at: Option<&'a str>,
    pub summary: Option<&'a str>,
    pub error: Option<&'a str>,
    pub host: Option<&'a str>,
}
