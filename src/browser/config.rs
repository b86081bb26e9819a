//! Browser engine configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::FALLBACK_TIMEOUT;

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// Set to false for debugging or if headless detection is an issue.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Seconds allowed for the browser to start (or the remote to answer).
    #[serde(default = "default_timeout")]
    pub open_timeout: u64,

    /// Seconds allowed for a page to become interactive.
    #[serde(default = "default_timeout")]
    pub navigation_timeout: u64,

    /// User agent override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            open_timeout: default_timeout(),
            navigation_timeout: default_timeout(),
            user_agent: None,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply environment variable overrides.
    ///
    /// - `BROWSER_URL` - remote DevTools endpoint
    /// - `BROWSER_HEADLESS` - "false" or "0" to show the window
    /// - `SOCKS_PROXY` - proxy server for browser traffic
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("BROWSER_URL") {
            if !url.trim().is_empty() {
                self.remote_url = Some(url.trim().to_string());
            }
        }
        if let Ok(val) = std::env::var("BROWSER_HEADLESS") {
            self.headless = !(val.eq_ignore_ascii_case("false") || val == "0");
        }
        if let Ok(proxy) = std::env::var("SOCKS_PROXY") {
            if !proxy.is_empty() {
                self.proxy = Some(proxy);
            }
        }
        self
    }

    pub fn open_timeout(&self) -> Duration {
        secs_or_fallback(self.open_timeout)
    }

    pub fn navigation_timeout(&self) -> Duration {
        secs_or_fallback(self.navigation_timeout)
    }
}

fn secs_or_fallback(secs: u64) -> Duration {
    if secs == 0 {
        FALLBACK_TIMEOUT
    } else {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: BrowserEngineConfig = toml::from_str("").unwrap();
        assert!(config.headless);
        assert_eq!(config.open_timeout(), Duration::from_secs(30));
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_zero_timeout_uses_fallback() {
        let config: BrowserEngineConfig = toml::from_str("navigation_timeout = 0").unwrap();
        assert_eq!(config.navigation_timeout(), FALLBACK_TIMEOUT);
    }
}
