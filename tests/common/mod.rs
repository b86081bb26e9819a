//! Scripted browser sessions for crawl tests.
//!
//! A `Feed` renders a timeline of posts as HTML. Each load-more reveals the
//! next page of posts and moves the scroll offset; once everything is
//! visible the offset stops moving.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use listcrawl::browser::{
    AuthState, BandwidthPolicy, LoadMore, Session, SessionError, SessionFactory, Viewport,
};
use listcrawl::crawl::{CrawlLimits, CrawlRequest};
use listcrawl::extract::{
    FieldRule, SelectorConfig, SelectorExtractor, TimestampFormat, TimestampRule, Transform,
};
use listcrawl::models::Record;

pub const FEED_URL: &str = "https://social.example.com/i/lists/42";
const PAGE_HEIGHT_PX: f64 = 600.0;

#[derive(Debug, Clone)]
pub struct Feed {
    pub total: usize,
    pub page_size: usize,
    /// Number of initial load-more calls that do not move the page.
    pub stalls: u32,
    pub reposts: HashSet<usize>,
    pub fail_navigation: bool,
    pub malformed: bool,
    pub viewport_delay: Option<Duration>,
}

impl Feed {
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size,
            stalls: 0,
            reposts: HashSet::new(),
            fail_navigation: false,
            malformed: false,
            viewport_delay: None,
        }
    }

    /// Effectively endless timeline.
    pub fn endless(page_size: usize) -> Self {
        Self::new(usize::MAX / 2, page_size)
    }

    pub fn with_stalls(mut self, stalls: u32) -> Self {
        self.stalls = stalls;
        self
    }

    pub fn with_reposts(mut self, indexes: impl IntoIterator<Item = usize>) -> Self {
        self.reposts = indexes.into_iter().collect();
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    pub fn with_viewport_delay(mut self, delay: Duration) -> Self {
        self.viewport_delay = Some(delay);
        self
    }
}

pub fn post_id(index: usize) -> String {
    format!("post-{:04}", index)
}

/// Records matching what the extractor yields for `indexes`.
pub fn seed_records(target_id: &str, indexes: impl IntoIterator<Item = usize>) -> Vec<Record> {
    indexes
        .into_iter()
        .map(|i| Record::new(post_id(i), target_id).with_content(format!("seeded {}", i)))
        .collect()
}

/// What the sessions were asked to do, in order.
#[derive(Default)]
pub struct SessionLog {
    pub opened: AtomicU32,
    pub closed: AtomicU32,
    pub events: Mutex<Vec<String>>,
}

impl SessionLog {
    fn record(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ScriptedSession {
    feed: Feed,
    log: Arc<SessionLog>,
    visible: usize,
    position: f64,
    loads: u32,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.log.record(format!("navigate {}", url));
        if self.feed.fail_navigation {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        Ok(())
    }

    async fn intercept_requests(&mut self, _policy: BandwidthPolicy) -> Result<(), SessionError> {
        self.log.record("intercept");
        Ok(())
    }

    async fn viewport(&mut self) -> Result<Viewport, SessionError> {
        if let Some(delay) = self.feed.viewport_delay {
            tokio::time::sleep(delay).await;
        }
        if self.feed.malformed {
            return Ok(Viewport::new(FEED_URL, ""));
        }

        let mut html = String::from("<html><body><main>");
        for i in 0..self.visible.min(self.feed.total) {
            let repost = if self.feed.reposts.contains(&i) {
                r#"<span class="repost">Reposted</span>"#
            } else {
                ""
            };
            html.push_str(&format!(
                r#"<article class="post" data-id="{id}">{repost}<a class="handle">@user{i}</a><p class="text">Post number {i}</p><time datetime="2024-05-01T12:00:00Z"></time></article>"#,
                id = post_id(i),
                repost = repost,
                i = i
            ));
        }
        html.push_str("</main></body></html>");
        Ok(Viewport::new(FEED_URL, html))
    }

    async fn scroll_position(&mut self, _container: Option<&str>) -> Result<f64, SessionError> {
        Ok(self.position)
    }

    async fn load_more(&mut self, _action: &LoadMore) -> Result<(), SessionError> {
        self.loads += 1;
        if self.loads > self.feed.stalls && self.visible < self.feed.total {
            self.visible = self.visible.saturating_add(self.feed.page_size);
            self.position += PAGE_HEIGHT_PX;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        self.log.record("close");
        Ok(())
    }
}

pub struct ScriptedSessions {
    feed: Feed,
    pub log: Arc<SessionLog>,
}

impl ScriptedSessions {
    pub fn new(feed: Feed) -> Arc<Self> {
        Arc::new(Self {
            feed,
            log: Arc::new(SessionLog::default()),
        })
    }
}

#[async_trait]
impl SessionFactory for ScriptedSessions {
    async fn open(&self, _auth: Option<&AuthState>) -> Result<Box<dyn Session>, SessionError> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        self.log.record("open");
        Ok(Box::new(ScriptedSession {
            feed: self.feed.clone(),
            log: self.log.clone(),
            visible: self.feed.page_size,
            position: 0.0,
            loads: 0,
        }))
    }
}

pub fn extractor_config() -> SelectorConfig {
    SelectorConfig {
        item: "article.post".to_string(),
        id: FieldRule {
            selector: None,
            attr: Some("data-id".to_string()),
            transform: None,
        },
        content: Some(FieldRule {
            selector: Some(".text".to_string()),
            ..Default::default()
        }),
        author: Some(FieldRule {
            selector: Some(".handle".to_string()),
            attr: None,
            transform: Some(Transform::Handle),
        }),
        published_at: Some(TimestampRule {
            field: FieldRule {
                selector: Some("time".to_string()),
                attr: Some("datetime".to_string()),
                transform: None,
            },
            format: TimestampFormat::Rfc3339,
        }),
        repost: Some(".repost".to_string()),
        ..Default::default()
    }
}

/// Limits tuned for fast tests: short settle delay, generous duration.
pub fn fast_limits() -> CrawlLimits {
    CrawlLimits {
        settle_delay_ms: 1,
        max_duration_secs: 30,
        ..Default::default()
    }
}

pub fn request(target_id: &str, limits: CrawlLimits) -> CrawlRequest {
    let extractor = SelectorExtractor::new(target_id, &extractor_config())
        .unwrap_or_else(|e| panic!("test extractor config is invalid: {}", e));
    CrawlRequest::new(target_id, FEED_URL, Arc::new(extractor)).with_limits(limits)
}
