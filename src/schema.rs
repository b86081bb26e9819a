// Kept in sync by hand with `DbContext::init_schema`.

diesel::table! {
    records (target_id, record_id) {
        target_id -> Text,
        record_id -> Text,
        content -> Text,
        author_handle -> Text,
        engagement_counters -> Text,
        media_urls -> Text,
        published_at -> BigInt,
        scraped_at -> BigInt,
        is_repost -> Integer,
    }
}

diesel::table! {
    crawl_jobs (job_id) {
        job_id -> Text,
        target_id -> Text,
        status -> Text,
        started_at -> Text,
        finished_at -> Nullable<Text>,
        summary -> Nullable<Text>,
        error -> Nullable<Text>,
        host -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(records, crawl_jobs);
