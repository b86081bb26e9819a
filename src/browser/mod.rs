//! Browser sessions for timeline crawling.
//!
//! A `Session` is one browser tab bound to an optional restored login. The
//! crawl loop only talks to the trait; `ChromeSession` (feature `browser`)
//! is the chromiumoxide-backed implementation.

mod auth;
mod config;
pub mod intercept;
#[cfg(feature = "browser")]
mod session;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub use auth::{AuthState, StoredCookie};
pub use config::BrowserEngineConfig;
pub use intercept::{BandwidthConfig, BandwidthPolicy, Decision, ResourceKind};
#[cfg(feature = "browser")]
pub use session::{ChromeSession, ChromeSessionFactory};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Browser unavailable: {0}")]
    Unavailable(String),
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Stable identifier used in `TaskError::code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "session_unavailable",
            Self::NavigationTimeout { .. } => "navigation_timeout",
            Self::Navigation { .. } => "navigation_failed",
            Self::Protocol(_) => "browser_protocol",
        }
    }

    /// Navigation hiccups are worth one more try; a dead browser is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NavigationTimeout { .. } | Self::Navigation { .. })
    }
}

/// Snapshot of the rendered page handed to an extractor.
#[derive(Debug, Clone)]
pub struct Viewport {
    pub url: String,
    pub html: String,
    /// Epoch milliseconds when the snapshot was taken.
    pub captured_at: i64,
}

impl Viewport {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            captured_at: crate::models::now_millis(),
        }
    }
}

/// How a page is asked for more content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadMore {
    /// Scroll the window to the bottom of the document.
    #[default]
    ScrollToBottom,
    /// Scroll an inner scrollable element to its bottom.
    ScrollContainer { selector: String },
    /// Click a "show more" control; falls back to scrolling when it is absent.
    Click { selector: String },
}

impl LoadMore {
    /// Element whose scroll offset measures progress (`None` = the window).
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::ScrollContainer { selector } => Some(selector),
            _ => None,
        }
    }
}

/// One browser tab driven by a crawl job.
#[async_trait]
pub trait Session: Send {
    /// Navigate and wait until the page is interactive.
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Install the bandwidth filter. Must run before `navigate`.
    async fn intercept_requests(&mut self, policy: BandwidthPolicy) -> Result<(), SessionError>;

    /// Capture the currently rendered page.
    async fn viewport(&mut self) -> Result<Viewport, SessionError>;

    /// Vertical scroll offset in CSS pixels of the window or `container`.
    async fn scroll_position(&mut self, container: Option<&str>) -> Result<f64, SessionError>;

    /// Trigger the page's load-more affordance.
    async fn load_more(&mut self, action: &LoadMore) -> Result<(), SessionError>;

    /// Release the tab and the browser behind it.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens sessions; one per crawl job.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, auth: Option<&AuthState>) -> Result<Box<dyn Session>, SessionError>;
}

/// Run `op`, retrying once if it fails with a transient error.
pub async fn retry_transient<T, F, Fut>(what: &str, mut op: F) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!("{} failed ({}), retrying once", what, e);
            op().await
        }
        other => other,
    }
}

/// Timeout for browser startup and navigation when the config says 0.
pub(crate) const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
