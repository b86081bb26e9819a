//! Bandwidth interception for browser sessions.
//!
//! Timeline pages pull far more images, fonts and video than the record
//! extractor ever needs. The policy here blocks those resource types unless
//! they come from an allow-listed host, and answers blocked requests with a
//! tiny synthetic payload so page scripts waiting on them keep running.
//! Document, script, stylesheet, xhr, fetch and websocket traffic is never
//! touched: extraction depends on it.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// 1x1 transparent GIF.
const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Resource type of an outgoing request, as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Script,
    Xhr,
    Fetch,
    WebSocket,
    EventSource,
    Image,
    Media,
    Font,
    TextTrack,
    Manifest,
    Ping,
    Prefetch,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Xhr => "xhr",
            Self::Fetch => "fetch",
            Self::WebSocket => "web_socket",
            Self::EventSource => "event_source",
            Self::Image => "image",
            Self::Media => "media",
            Self::Font => "font",
            Self::TextTrack => "text_track",
            Self::Manifest => "manifest",
            Self::Ping => "ping",
            Self::Prefetch => "prefetch",
            Self::Other => "other",
        }
    }

    /// Types that record extraction depends on. Never blocked.
    pub fn is_essential(&self) -> bool {
        matches!(
            self,
            Self::Document
                | Self::Stylesheet
                | Self::Script
                | Self::Xhr
                | Self::Fetch
                | Self::WebSocket
        )
    }
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

/// Minimal valid response served in place of a blocked request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl SyntheticResponse {
    /// Body encoded for the DevTools `Fetch.fulfillRequest` call.
    pub fn body_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.body)
    }
}

/// Payload used to fulfill a blocked request of the given kind.
pub fn synthetic_response(kind: ResourceKind) -> SyntheticResponse {
    let (content_type, body): (&'static str, &[u8]) = match kind {
        ResourceKind::Image => ("image/gif", TRANSPARENT_GIF),
        ResourceKind::Font => ("font/woff2", b""),
        ResourceKind::Media => ("application/octet-stream", b""),
        ResourceKind::TextTrack => ("text/vtt", b"WEBVTT\n\n"),
        ResourceKind::Manifest => ("application/manifest+json", b"{}"),
        _ => ("text/plain", b""),
    };
    SyntheticResponse {
        status: 200,
        content_type,
        body: body.to_vec(),
    }
}

/// Bandwidth section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    /// Install the filter at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Resource types to block.
    #[serde(default = "default_blocked_types")]
    pub blocked_types: Vec<ResourceKind>,
    /// Hosts (and their subdomains) that are never blocked.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_blocked_types() -> Vec<ResourceKind> {
    vec![ResourceKind::Image, ResourceKind::Font, ResourceKind::Media]
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            blocked_types: default_blocked_types(),
            allowed_hosts: Vec::new(),
        }
    }
}

impl BandwidthConfig {
    /// The policy to install, or `None` when interception is disabled.
    pub fn policy(&self) -> Option<BandwidthPolicy> {
        self.enabled
            .then(|| BandwidthPolicy::new(self.blocked_types.clone(), self.allowed_hosts.clone()))
    }
}

/// Stateless per-request filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthPolicy {
    blocked: Vec<ResourceKind>,
    allowed_hosts: Vec<String>,
}

impl BandwidthPolicy {
    pub fn new(blocked: Vec<ResourceKind>, allowed_hosts: Vec<String>) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| h.trim().trim_start_matches("*.").to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            blocked,
            allowed_hosts,
        }
    }

    pub fn decide(&self, kind: ResourceKind, url: &str) -> Decision {
        if kind.is_essential() || !self.blocked.contains(&kind) {
            return Decision::Allow;
        }
        if self.host_allowed(url) {
            Decision::Allow
        } else {
            Decision::Block
        }
    }

    fn host_allowed(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            return false;
        };
        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || (host.ends_with(allowed.as_str())
                    && host[..host.len() - allowed.len()].ends_with('.'))
        })
    }
}

#[cfg(feature = "browser")]
pub(crate) use cdp::install;

#[cfg(feature = "browser")]
mod cdp {
    use chromiumoxide::cdp::browser_protocol::fetch::{
        ContinueRequestParams, EnableParams, EventRequestPaused, FulfillRequestParams,
        HeaderEntry, RequestPattern, RequestStage,
    };
    use chromiumoxide::cdp::browser_protocol::network::ResourceType;
    use chromiumoxide::Page;
    use futures::StreamExt;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    use super::{synthetic_response, BandwidthPolicy, Decision, ResourceKind};
    use crate::browser::SessionError;

    impl From<&ResourceType> for ResourceKind {
        fn from(value: &ResourceType) -> Self {
            match value {
                ResourceType::Document => Self::Document,
                ResourceType::Stylesheet => Self::Stylesheet,
                ResourceType::Script => Self::Script,
                ResourceType::Xhr => Self::Xhr,
                ResourceType::Fetch => Self::Fetch,
                ResourceType::WebSocket => Self::WebSocket,
                ResourceType::EventSource => Self::EventSource,
                ResourceType::Image => Self::Image,
                ResourceType::Media => Self::Media,
                ResourceType::Font => Self::Font,
                ResourceType::TextTrack => Self::TextTrack,
                ResourceType::Manifest => Self::Manifest,
                ResourceType::Ping => Self::Ping,
                ResourceType::Prefetch => Self::Prefetch,
                _ => Self::Other,
            }
        }
    }

    /// Enable request interception on `page` and answer every paused request
    /// according to `policy`. The returned task runs until the page goes away.
    pub(crate) async fn install(
        page: &Page,
        policy: BandwidthPolicy,
    ) -> Result<JoinHandle<()>, SessionError> {
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| SessionError::Protocol(format!("request listener: {}", e)))?;

        let enable = EnableParams {
            patterns: Some(vec![RequestPattern {
                url_pattern: Some("*".to_string()),
                resource_type: None,
                request_stage: Some(RequestStage::Request),
            }]),
            handle_auth_requests: None,
        };
        page.execute(enable)
            .await
            .map_err(|e| SessionError::Protocol(format!("Fetch.enable: {}", e)))?;

        let page = page.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let kind = ResourceKind::from(&event.resource_type);
                let result = match policy.decide(kind, &event.request.url) {
                    Decision::Allow => page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ()),
                    Decision::Block => {
                        debug!("Blocked {} {}", kind.as_str(), event.request.url);
                        let synthetic = synthetic_response(kind);
                        let params = FulfillRequestParams::builder()
                            .request_id(event.request_id.clone())
                            .response_code(synthetic.status as i64)
                            .response_headers(vec![HeaderEntry::new(
                                "Content-Type",
                                synthetic.content_type,
                            )])
                            .body(synthetic.body_base64())
                            .build();
                        match params {
                            Ok(params) => page.execute(params).await.map(|_| ()),
                            Err(e) => {
                                warn!("Failed to build fulfill params: {}", e);
                                page.execute(ContinueRequestParams::new(
                                    event.request_id.clone(),
                                ))
                                .await
                                .map(|_| ())
                            }
                        }
                    }
                };
                if let Err(e) = result {
                    debug!("Intercepted request could not be answered: {}", e);
                }
            }
        }))
    }
}
