//! Chrome-backed sessions over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::intercept;
use super::{
    retry_transient, AuthState, BandwidthPolicy, BrowserEngineConfig, LoadMore, Session,
    SessionError, SessionFactory, Viewport,
};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

const READY_STATE_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

const SCROLL_WINDOW_SCRIPT: &str = r#"
    (() => {
        const root = document.scrollingElement || document.documentElement;
        window.scrollTo(0, root.scrollHeight);
        return true;
    })()
"#;

/// Launches (or attaches to) Chrome for each crawl job.
pub struct ChromeSessionFactory {
    config: BrowserEngineConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    fn find_chrome() -> Result<PathBuf, SessionError> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                debug!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(SessionError::Unavailable(
            "Chrome/Chromium not found. Install chromium or set BROWSER_URL to a running instance"
                .to_string(),
        ))
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), SessionError> {
        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;
        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| SessionError::Unavailable(format!("browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Unavailable(format!("failed to launch browser: {}", e)))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn connect_remote(&self, url: &str) -> Result<(Browser, JoinHandle<()>), SessionError> {
        info!("Connecting to remote browser at {}", url);

        let ws_url = if url.contains("/devtools/browser/") {
            url.to_string()
        } else {
            // Resolve the WebSocket URL from the /json/version endpoint
            let http_url = url
                .replace("ws://", "http://")
                .replace("wss://", "https://");
            let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

            let resp: serde_json::Value = reqwest::Client::new()
                .get(&version_url)
                .send()
                .await
                .map_err(|e| {
                    SessionError::Unavailable(format!("remote browser unreachable: {}", e))
                })?
                .json()
                .await
                .map_err(|e| {
                    SessionError::Unavailable(format!("bad browser version info: {}", e))
                })?;

            resp.get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    SessionError::Unavailable("no webSocketDebuggerUrl in response".to_string())
                })?
        };

        debug!("Connecting to WebSocket: {}", ws_url);

        let (browser, mut handler) = Browser::connect(ws_url).await.map_err(|e| {
            SessionError::Unavailable(format!("failed to connect to remote browser: {}", e))
        })?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn open_inner(&self, auth: Option<&AuthState>) -> Result<ChromeSession, SessionError> {
        let remote = self.config.remote_url.is_some();
        let (browser, handler) = match self.config.remote_url {
            Some(ref url) => self.connect_remote(url).await?,
            None => self.launch().await?,
        };

        let tab = browser.new_page("about:blank").await;
        let mut session = ChromeSession {
            browser: Some(browser),
            page: None,
            handler,
            interceptor: None,
            navigation_timeout: self.config.navigation_timeout(),
            remote,
        };

        match tab {
            Ok(page) => session.page = Some(page),
            Err(e) => {
                let _ = session.close().await;
                return Err(SessionError::Unavailable(format!("failed to open tab: {}", e)));
            }
        }

        if let Err(e) = self.prepare(&session, auth).await {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn prepare(
        &self,
        session: &ChromeSession,
        auth: Option<&AuthState>,
    ) -> Result<(), SessionError> {
        let page = session.page()?;
        if let Some(ref ua) = self.config.user_agent {
            page.execute(SetUserAgentOverrideParams::new(ua.clone()))
                .await
                .map_err(|e| SessionError::Protocol(format!("user agent override: {}", e)))?;
        }
        if let Some(auth) = auth {
            restore_cookies(page, auth).await?;
        }
        Ok(())
    }
}

async fn restore_cookies(page: &Page, auth: &AuthState) -> Result<(), SessionError> {
    let cookies = auth.cookies()?;
    let mut params = Vec::with_capacity(cookies.len());
    for cookie in &cookies {
        match cookie.to_param() {
            Ok(param) => params.push(param),
            Err(e) => warn!("Failed to build cookie {}: {}", cookie.name, e),
        }
    }
    debug!("Restoring {} cookies", params.len());
    if !params.is_empty() {
        page.set_cookies(params)
            .await
            .map_err(|e| SessionError::Protocol(format!("failed to restore cookies: {}", e)))?;
    }
    Ok(())
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self, auth: Option<&AuthState>) -> Result<Box<dyn Session>, SessionError> {
        let timeout = self.config.open_timeout();
        match tokio::time::timeout(timeout, self.open_inner(auth)).await {
            Ok(Ok(session)) => Ok(Box::new(session)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Unavailable(format!(
                "browser did not start within {:?}",
                timeout
            ))),
        }
    }
}

/// One Chrome tab, plus the browser process when it was launched locally.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    interceptor: Option<JoinHandle<()>>,
    navigation_timeout: Duration,
    remote: bool,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, SessionError> {
        self.page
            .as_ref()
            .ok_or_else(|| SessionError::Unavailable("session is closed".to_string()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, SessionError> {
        self.page()?
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

async fn goto(page: Page, url: String, timeout: Duration) -> Result<(), SessionError> {
    debug!("Navigating to {}", url);
    match tokio::time::timeout(timeout, page.goto(url.as_str())).await {
        Err(_) => {
            return Err(SessionError::NavigationTimeout { url, timeout });
        }
        Ok(Err(e)) => {
            return Err(SessionError::Navigation {
                url,
                message: e.to_string(),
            });
        }
        Ok(Ok(_)) => {}
    }

    match tokio::time::timeout(timeout, page.evaluate(READY_STATE_SCRIPT.to_string())).await {
        Ok(Ok(result)) => {
            let state: String = result
                .into_value()
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("Page ready state: {}", state);
            Ok(())
        }
        Ok(Err(e)) => Err(SessionError::Navigation {
            url,
            message: format!("ready state check failed: {}", e),
        }),
        Err(_) => Err(SessionError::NavigationTimeout { url, timeout }),
    }
}

/// JS string literal for `s`.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let page = self.page()?.clone();
        let timeout = self.navigation_timeout;
        retry_transient("navigation", || goto(page.clone(), url.to_string(), timeout)).await
    }

    async fn intercept_requests(&mut self, policy: BandwidthPolicy) -> Result<(), SessionError> {
        let handle = intercept::install(self.page()?, policy).await?;
        if let Some(previous) = self.interceptor.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn viewport(&mut self) -> Result<Viewport, SessionError> {
        let page = self.page()?;
        let html = page
            .content()
            .await
            .map_err(|e| SessionError::Protocol(format!("failed to read page: {}", e)))?;
        let url = page.url().await.ok().flatten().unwrap_or_default();
        Ok(Viewport::new(url, html))
    }

    async fn scroll_position(&mut self, container: Option<&str>) -> Result<f64, SessionError> {
        let script = match container {
            Some(selector) => format!(
                "(() => {{ const el = document.querySelector({}); return el ? el.scrollTop : 0; }})()",
                js_string(selector)
            ),
            None => "window.scrollY".to_string(),
        };
        self.eval::<f64>(script).await
    }

    async fn load_more(&mut self, action: &LoadMore) -> Result<(), SessionError> {
        let script = match action {
            LoadMore::ScrollToBottom => SCROLL_WINDOW_SCRIPT.to_string(),
            LoadMore::ScrollContainer { selector } => format!(
                "(() => {{ const el = document.querySelector({}); \
                 if (!el) return false; el.scrollTop = el.scrollHeight; return true; }})()",
                js_string(selector)
            ),
            LoadMore::Click { selector } => format!(
                "(() => {{ const el = document.querySelector({}); \
                 if (el) {{ el.scrollIntoView({{block: 'center'}}); el.click(); return true; }} \
                 {} return false; }})()",
                js_string(selector),
                SCROLL_WINDOW_SCRIPT.trim()
            ),
        };
        let performed: bool = self.eval(script).await?;
        if !performed {
            debug!("Load-more target not found for {:?}", action);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(handle) = self.interceptor.take() {
            handle.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close tab: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            // Attached browsers belong to someone else; only drop the connection.
            if !self.remote {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {}", e);
                }
                let _ = browser.wait().await;
            }
        }
        self.handler.abort();
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handle) = self.interceptor.take() {
            handle.abort();
        }
        self.handler.abort();
    }
}
