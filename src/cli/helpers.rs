//! Shared helper functions for CLI commands.

use std::sync::Arc;

use crate::browser::SessionFactory;
use crate::config::Config;
use crate::repository::DbContext;

/// Open the configured database, creating the data directory and schema.
pub async fn open_database(config: &Config) -> anyhow::Result<DbContext> {
    let url = config.database_url();
    let path = url.strip_prefix("sqlite:").unwrap_or(&url);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let ctx = DbContext::from_url(&url);
    ctx.init_schema().await?;
    Ok(ctx)
}

/// Browser sessions for real crawls.
#[cfg(feature = "browser")]
pub fn session_factory(config: &Config) -> anyhow::Result<Arc<dyn SessionFactory>> {
    Ok(Arc::new(crate::browser::ChromeSessionFactory::new(
        config.browser.clone(),
    )))
}

#[cfg(not(feature = "browser"))]
pub fn session_factory(_config: &Config) -> anyhow::Result<Arc<dyn SessionFactory>> {
    anyhow::bail!("listcrawl was built without browser support (enable the `browser` feature)")
}

/// Truncate a string to max characters with ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

pub fn format_duration_ms(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1500), "1.5s");
        assert_eq!(format_duration_ms(125_000), "2m05s");
    }
}
