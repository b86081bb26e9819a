//! Configuration management using the prefer crate for discovery.
//!
//! A config file (`listcrawl.toml`, `.yaml` or `.json`) names the crawl
//! targets and overrides engine defaults:
//!
//! ```toml
//! pool_size = 2
//!
//! [crawl]
//! max_records = 200
//!
//! [targets.news]
//! url = "https://social.example.com/i/lists/42"
//! auth_state = "~/.config/listcrawl/state.json"
//! load_more = { kind = "scroll_to_bottom" }
//!
//! [targets.news.extractor]
//! item = "article"
//! id = { selector = "a.permalink", attr = "href", transform = "last_path_segment" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::browser::{AuthState, BandwidthConfig, BrowserEngineConfig, LoadMore};
use crate::crawl::{CrawlLimits, CrawlRequest};
use crate::extract::{ExtractionError, SelectorConfig, SelectorExtractor};

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "listcrawl.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Unknown target: {0}")]
    UnknownTarget(String),
    #[error("Invalid extractor for target {target}: {source}")]
    Extractor {
        target: String,
        #[source]
        source: ExtractionError,
    },
    #[error("Failed to read auth state {path}: {source}")]
    AuthState {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One crawlable timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default)]
    pub load_more: LoadMore,
    /// Path to a storage-state JSON file with the login cookies.
    #[serde(default)]
    pub auth_state: Option<String>,
    pub extractor: SelectorConfig,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub duplicate_stop_threshold: Option<usize>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (database lives here unless `database` is a URL).
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Database filename, or a full `sqlite:` URL.
    #[serde(default)]
    pub database: Option<String>,

    /// Number of crawls allowed to run at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    #[serde(default)]
    pub bandwidth: BandwidthConfig,

    /// Default thresholds for every target.
    #[serde(default)]
    pub crawl: CrawlLimits,

    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,

    /// Path the config was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_pool_size() -> usize {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: None,
            pool_size: default_pool_size(),
            browser: BrowserEngineConfig::default(),
            bandwidth: BandwidthConfig::default(),
            crawl: CrawlLimits::default(),
            targets: BTreeMap::new(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Falls back to defaults (plus env overrides) when no file is found.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("listcrawl").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default().with_env_overrides()),
            },
            Err(e) => {
                debug!("No config file discovered: {}", e);
                Ok(Self::default().with_env_overrides())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// The format is chosen by file extension (TOML, YAML, otherwise JSON).
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// - `LISTCRAWL_DATA_DIR` - data directory
    /// - `LISTCRAWL_DATABASE_URL` - database URL or filename
    /// - `LISTCRAWL_POOL_SIZE` - concurrent crawl limit
    /// - `BROWSER_URL`, `BROWSER_HEADLESS`, `SOCKS_PROXY` - see `BrowserEngineConfig`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("LISTCRAWL_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(dir);
            }
        }
        if let Ok(url) = std::env::var("LISTCRAWL_DATABASE_URL") {
            if !url.is_empty() {
                self.database = Some(url);
            }
        }
        if let Ok(size) = std::env::var("LISTCRAWL_POOL_SIZE") {
            match size.parse() {
                Ok(n) => self.pool_size = n,
                Err(_) => warn!("Ignoring invalid LISTCRAWL_POOL_SIZE: {}", size),
            }
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available, otherwise CWD.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir()`
    pub fn resolve_path(&self, path_str: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir {
            Some(ref dir) => self.resolve_path(dir),
            None => dirs::data_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("listcrawl"),
        }
    }

    /// Get the database URL, constructing it from the data dir when
    /// `database` is a bare filename.
    pub fn database_url(&self) -> String {
        match self.database.as_deref() {
            Some(url) if url.starts_with("sqlite:") || url.contains("://") => url.to_string(),
            Some(name) => format!("sqlite:{}", self.data_dir().join(name).display()),
            None => format!(
                "sqlite:{}",
                self.data_dir().join(DEFAULT_DATABASE_FILENAME).display()
            ),
        }
    }

    pub fn target(&self, target_id: &str) -> Result<&TargetConfig, ConfigError> {
        self.targets
            .get(target_id)
            .ok_or_else(|| ConfigError::UnknownTarget(target_id.to_string()))
    }

    /// Global limits with the target's overrides applied.
    pub fn limits_for(&self, target: &TargetConfig) -> CrawlLimits {
        let mut limits = self.crawl.clone();
        if let Some(n) = target.max_records {
            limits.max_records = n;
        }
        if let Some(n) = target.duplicate_stop_threshold {
            limits.duplicate_stop_threshold = n;
        }
        if let Some(secs) = target.max_duration_secs {
            limits.max_duration_secs = secs;
        }
        limits
    }

    /// Build a ready-to-submit request for a configured target.
    pub async fn crawl_request(&self, target_id: &str) -> Result<CrawlRequest, ConfigError> {
        let target = self.target(target_id)?;
        let extractor = SelectorExtractor::new(target_id, &target.extractor).map_err(|source| {
            ConfigError::Extractor {
                target: target_id.to_string(),
                source,
            }
        })?;

        let mut request = CrawlRequest::new(target_id, target.url.clone(), Arc::new(extractor))
            .with_limits(self.limits_for(target))
            .with_load_more(target.load_more.clone());

        if let Some(ref path) = target.auth_state {
            let path = self.resolve_path(path);
            let loaded = AuthState::load(&path).await;
            let state = loaded.map_err(|source| ConfigError::AuthState { path, source })?;
            request = request.with_auth_state(state);
        }
        Ok(request)
    }

    /// Starter config written by `listcrawl init`.
    pub fn template() -> &'static str {
        r#"# listcrawl configuration
pool_size = 2

[browser]
headless = true
# remote_url = "ws://localhost:9222"

[bandwidth]
enabled = true
blocked_types = ["image", "font", "media"]
allowed_hosts = []

[crawl]
max_records = 100
duplicate_stop_threshold = 5
max_ineffective_scrolls = 3
min_scroll_distance_px = 100.0
settle_delay_ms = 1500
max_duration_secs = 1800

# [targets.example]
# url = "https://social.example.com/i/lists/42"
# auth_state = "state.json"
# load_more = { kind = "scroll_to_bottom" }
#
# [targets.example.extractor]
# item = "article"
# id = { selector = "a.permalink", attr = "href", transform = "last_path_segment" }
# content = { selector = ".text" }
# author = { selector = ".handle", transform = "handle" }
# published_at = { selector = "time", attr = "datetime", format = "rfc3339" }
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        data_dir = "/var/lib/listcrawl"
        pool_size = 3

        [crawl]
        max_records = 50

        [targets.news]
        url = "https://social.example.com/i/lists/42"
        max_records = 20
        load_more = { kind = "click", selector = "button.more" }

        [targets.news.extractor]
        item = "article"
        id = { attr = "data-id" }
    "#;

    #[test]
    fn test_template_parses() {
        let config = Config::parse(Config::template(), "toml").unwrap();
        assert_eq!(config.pool_size, 2);
        assert!(config.targets.is_empty());
        assert_eq!(config.crawl.max_records, 100);
    }

    #[test]
    fn test_target_overrides_limits() {
        let config = Config::parse(SAMPLE, "toml").unwrap();
        let target = config.target("news").unwrap();
        let limits = config.limits_for(target);
        assert_eq!(limits.max_records, 20);
        assert_eq!(limits.duplicate_stop_threshold, 5);
        assert_eq!(
            target.load_more,
            LoadMore::Click {
                selector: "button.more".to_string()
            }
        );
        assert!(matches!(
            config.target("missing"),
            Err(ConfigError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_database_url_from_data_dir() {
        let config = Config::parse(SAMPLE, "toml").unwrap();
        assert_eq!(
            config.database_url(),
            "sqlite:/var/lib/listcrawl/listcrawl.db"
        );

        let mut config = config;
        config.database = Some("sqlite:/tmp/other.db".to_string());
        assert_eq!(config.database_url(), "sqlite:/tmp/other.db");
        config.database = Some("custom.db".to_string());
        assert_eq!(config.database_url(), "sqlite:/var/lib/listcrawl/custom.db");
    }

    #[test]
    fn test_yaml_and_json_formats() {
        let yaml = "pool_size: 5\ncrawl:\n  max_records: 7\n";
        let config = Config::parse(yaml, "yml").unwrap();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.crawl.max_records, 7);

        let config = Config::parse(r#"{"pool_size": 4}"#, "json").unwrap();
        assert_eq!(config.pool_size, 4);

        assert!(matches!(
            Config::parse("pool_size = [", "toml"),
            Err(ConfigError::Parse { format: "TOML", .. })
        ));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_file() {
        let mut config = Config::default();
        config.source_path = Some(PathBuf::from("/etc/listcrawl/listcrawl.toml"));
        assert_eq!(
            config.resolve_path("state.json"),
            PathBuf::from("/etc/listcrawl/state.json")
        );
        assert_eq!(config.resolve_path("/abs/x"), PathBuf::from("/abs/x"));
    }

    #[tokio::test]
    async fn test_crawl_request_loads_auth_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listcrawl.toml");
        tokio::fs::write(dir.path().join("state.json"), br#"{"cookies": []}"#)
            .await
            .unwrap();
        tokio::fs::write(
            &path,
            r#"
                [targets.news]
                url = "https://social.example.com/i/lists/42"
                max_records = 20
                auth_state = "state.json"

                [targets.news.extractor]
                item = "article"
                id = { attr = "data-id" }
            "#,
        )
        .await
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let request = config.crawl_request("news").await.unwrap();
        assert_eq!(request.limits.max_records, 20);
        assert!(request.auth_state.is_some());
        assert_eq!(request.extractor.name(), "news");
    }

    #[tokio::test]
    async fn test_missing_auth_state_is_reported() {
        let mut config = Config::parse(SAMPLE, "toml").unwrap();
        if let Some(target) = config.targets.get_mut("news") {
            target.auth_state = Some("/nonexistent/listcrawl/state.json".to_string());
        }
        assert!(matches!(
            config.crawl_request("news").await,
            Err(ConfigError::AuthState { .. })
        ));
    }
}
