//! Timeline record model.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One structured item extracted from a timeline (a post, a video entry).
///
/// `id` is the site-native identifier and is unique per site: two records with
/// the same `id` are the same entity no matter which run produced them.
/// Timestamps are epoch milliseconds held as `i64` so that site timestamps
/// past the 32-bit range survive without precision loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_handle: String,
    /// Likes, replies, views... keyed by counter name.
    #[serde(default)]
    pub engagement_counters: BTreeMap<String, i64>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    pub published_at: i64,
    pub source_target_id: String,
    pub scraped_at: i64,
    /// Re-share of another account's item.
    #[serde(default)]
    pub is_repost: bool,
}

impl Record {
    /// Create a record with empty payload, stamped with the current time.
    pub fn new(id: impl Into<String>, source_target_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            content: String::new(),
            author_handle: String::new(),
            engagement_counters: BTreeMap::new(),
            media_urls: Vec::new(),
            published_at: now,
            source_target_id: source_target_id.into(),
            scraped_at: now,
            is_repost: false,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_author(mut self, handle: impl Into<String>) -> Self {
        self.author_handle = handle.into();
        self
    }

    pub fn with_published_at(mut self, published_at: i64) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: i64) -> Self {
        self.engagement_counters.insert(name.into(), value);
        self
    }

    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media_urls.push(url.into());
        self
    }

    pub fn as_repost(mut self) -> Self {
        self.is_repost = true;
        self
    }
}
