//! CSS-selector driven extractor.
//!
//! Every selector comes from configuration. A target section looks like:
//!
//! ```toml
//! [targets.news.extractor]
//! item = "article[data-testid=tweet]"
//! id = { selector = "a[href*='/status/']", attr = "href", transform = "last_path_segment" }
//! content = { selector = "div[lang]" }
//! author = { selector = "a[role=link] span", transform = "handle" }
//! published_at = { selector = "time", attr = "datetime", format = "rfc3339" }
//! media = { selector = "img[src*='/media/']", attr = "src" }
//! repost = "span[data-testid=socialContext]"
//!
//! [targets.news.extractor.counters]
//! replies = { selector = "[data-testid=reply]" }
//! likes = { selector = "[data-testid=like]" }
//! ```

use std::collections::BTreeMap;

use chrono::DateTime;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExtractionError, Extractor};
use crate::browser::Viewport;
use crate::models::Record;

/// Post-processing applied to an extracted string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Keep the last non-empty path segment of a URL (`/u/status/123?x` → `123`).
    LastPathSegment,
    /// Keep only ASCII digits.
    Digits,
    /// Strip a leading `@`.
    Handle,
}

impl Transform {
    fn apply(&self, value: &str) -> String {
        match self {
            Self::LastPathSegment => value
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .split('/')
                .rfind(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string(),
            Self::Digits => value.chars().filter(|c| c.is_ascii_digit()).collect(),
            Self::Handle => value.trim().trim_start_matches('@').to_string(),
        }
    }
}

/// Where a single value lives inside an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRule {
    /// Selector relative to the item; the item itself when absent.
    #[serde(default)]
    pub selector: Option<String>,
    /// Attribute to read; element text when absent.
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    #[default]
    Rfc3339,
    EpochMs,
    EpochS,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimestampRule {
    #[serde(flatten)]
    pub field: FieldRule,
    #[serde(default)]
    pub format: TimestampFormat,
}

/// Extractor section of a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Selects one element per record.
    pub item: String,
    pub id: FieldRule,
    #[serde(default)]
    pub content: Option<FieldRule>,
    #[serde(default)]
    pub author: Option<FieldRule>,
    #[serde(default)]
    pub published_at: Option<TimestampRule>,
    /// Every match is a media URL, in document order.
    #[serde(default)]
    pub media: Option<FieldRule>,
    #[serde(default)]
    pub counters: BTreeMap<String, FieldRule>,
    /// Presence of a match inside the item marks a repost.
    #[serde(default)]
    pub repost: Option<String>,
}

struct CompiledRule {
    selector: Option<Selector>,
    attr: Option<String>,
    transform: Option<Transform>,
}

impl CompiledRule {
    fn compile(rule: &FieldRule) -> Result<Self, ExtractionError> {
        Ok(Self {
            selector: rule.selector.as_deref().map(compile).transpose()?,
            attr: rule.attr.clone(),
            transform: rule.transform,
        })
    }

    fn value_of(&self, element: ElementRef<'_>) -> Option<String> {
        let raw = match self.attr {
            Some(ref attr) => element.value().attr(attr)?.to_string(),
            None => element.text().collect::<Vec<_>>().join(" "),
        };
        let raw = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let value = match self.transform {
            Some(t) => t.apply(&raw),
            None => raw,
        };
        (!value.is_empty()).then_some(value)
    }

    fn first(&self, item: ElementRef<'_>) -> Option<String> {
        match self.selector {
            Some(ref selector) => item.select(selector).find_map(|el| self.value_of(el)),
            None => self.value_of(item),
        }
    }

    fn all(&self, item: ElementRef<'_>) -> Vec<String> {
        match self.selector {
            Some(ref selector) => item.select(selector).filter_map(|el| self.value_of(el)).collect(),
            None => self.value_of(item).into_iter().collect(),
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Site-agnostic extractor driven entirely by `SelectorConfig`.
pub struct SelectorExtractor {
    name: String,
    item: Selector,
    id: CompiledRule,
    content: Option<CompiledRule>,
    author: Option<CompiledRule>,
    published_at: Option<(CompiledRule, TimestampFormat)>,
    media: Option<CompiledRule>,
    counters: Vec<(String, CompiledRule)>,
    repost: Option<Selector>,
}

impl SelectorExtractor {
    /// Compile all selectors up front so a bad config fails before crawling.
    pub fn new(name: impl Into<String>, config: &SelectorConfig) -> Result<Self, ExtractionError> {
        Ok(Self {
            name: name.into(),
            item: compile(&config.item)?,
            id: CompiledRule::compile(&config.id)?,
            content: config.content.as_ref().map(CompiledRule::compile).transpose()?,
            author: config.author.as_ref().map(CompiledRule::compile).transpose()?,
            published_at: config
                .published_at
                .as_ref()
                .map(|r| CompiledRule::compile(&r.field).map(|c| (c, r.format)))
                .transpose()?,
            media: config
                .media
                .as_ref()
                .map(|r| {
                    let mut rule = r.clone();
                    rule.attr.get_or_insert_with(|| "src".to_string());
                    CompiledRule::compile(&rule)
                })
                .transpose()?,
            counters: config
                .counters
                .iter()
                .map(|(name, rule)| CompiledRule::compile(rule).map(|c| (name.clone(), c)))
                .collect::<Result<_, _>>()?,
            repost: config.repost.as_deref().map(compile).transpose()?,
        })
    }

    fn record_from(
        &self,
        item: ElementRef<'_>,
        base: Option<&url::Url>,
        target_id: &str,
    ) -> Option<Record> {
        let id = self.id.first(item)?;
        let mut record = Record::new(id, target_id);

        if let Some(ref rule) = self.content {
            record.content = rule.first(item).unwrap_or_default();
        }
        if let Some(ref rule) = self.author {
            record.author_handle = rule.first(item).unwrap_or_default();
        }
        if let Some((ref rule, format)) = self.published_at {
            match rule.first(item).and_then(|raw| parse_timestamp(&raw, format)) {
                Some(ts) => record.published_at = ts,
                None => debug!("No usable timestamp for record {}", record.id),
            }
        }
        if let Some(ref rule) = self.media {
            record.media_urls = rule
                .all(item)
                .into_iter()
                .map(|src| resolve(base, &src))
                .collect();
        }
        for (name, rule) in &self.counters {
            let value = rule.first(item).and_then(|raw| parse_count(&raw)).unwrap_or(0);
            record.engagement_counters.insert(name.clone(), value);
        }
        if let Some(ref selector) = self.repost {
            record.is_repost = item.select(selector).next().is_some();
        }
        Some(record)
    }
}

impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, viewport: &Viewport, target_id: &str) -> Result<Vec<Record>, ExtractionError> {
        if viewport.html.trim().is_empty() {
            return Err(ExtractionError::Malformed("viewport is empty".to_string()));
        }

        let base = url::Url::parse(&viewport.url).ok();
        let document = Html::parse_document(&viewport.html);

        let mut matched = 0usize;
        let mut records = Vec::new();
        for item in document.select(&self.item) {
            matched += 1;
            if let Some(mut record) = self.record_from(item, base.as_ref(), target_id) {
                record.scraped_at = viewport.captured_at;
                records.push(record);
            }
        }

        if matched > 0 && records.is_empty() {
            return Err(ExtractionError::Malformed(format!(
                "{} items matched but none had an id",
                matched
            )));
        }
        Ok(records)
    }
}

fn resolve(base: Option<&url::Url>, src: &str) -> String {
    match base.and_then(|b| b.join(src).ok()) {
        Some(url) => url.to_string(),
        None => src.to_string(),
    }
}

fn parse_timestamp(raw: &str, format: TimestampFormat) -> Option<i64> {
    match format {
        TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.timestamp_millis()),
        TimestampFormat::EpochMs => raw.trim().parse::<i64>().ok(),
        TimestampFormat::EpochS => raw.trim().parse::<i64>().ok().and_then(|s| s.checked_mul(1000)),
    }
}

/// Parse a displayed engagement count: `"1,234"`, `"1.2K"`, `"3M"`, `"12 replies"`.
pub fn parse_count(raw: &str) -> Option<i64> {
    let token = raw
        .split_whitespace()
        .find(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()))?;
    let token = token.replace(',', "");

    let (number, multiplier) = match token.chars().last()?.to_ascii_uppercase() {
        'K' => (&token[..token.len() - 1], 1_000f64),
        'M' => (&token[..token.len() - 1], 1_000_000f64),
        'B' => (&token[..token.len() - 1], 1_000_000_000f64),
        _ => (token.as_str(), 1f64),
    };

    if multiplier == 1f64 {
        return number.parse::<i64>().ok();
    }
    number
        .parse::<f64>()
        .ok()
        .map(|n| (n * multiplier).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body><main>
          <article class="post">
            <a class="permalink" href="/alice/status/1001?s=20">link</a>
            <span class="handle">@alice</span>
            <div class="text">First   post</div>
            <time datetime="2024-03-01T12:00:00Z">Mar 1</time>
            <img class="media" src="/media/a.jpg">
            <img class="media" src="https://cdn.example.com/b.jpg">
            <span class="likes">1.2K</span>
          </article>
          <article class="post">
            <div class="context">reposted</div>
            <a class="permalink" href="/bob/status/1002">link</a>
            <span class="handle">@bob</span>
            <div class="text">Second</div>
          </article>
          <article class="post promo"><div class="text">Ad without id</div></article>
        </main></body></html>
    "#;

    fn config() -> SelectorConfig {
        toml::from_str(
            r#"
            item = "article.post"
            id = { selector = "a.permalink", attr = "href", transform = "last_path_segment" }
            content = { selector = ".text" }
            author = { selector = ".handle", transform = "handle" }
            published_at = { selector = "time", attr = "datetime", format = "rfc3339" }
            media = { selector = "img.media" }
            repost = ".context"

            [counters]
            likes = { selector = ".likes" }
            "#,
        )
        .unwrap()
    }

    fn viewport(html: &str) -> Viewport {
        Viewport::new("https://social.example.com/i/lists/42", html)
    }

    #[test]
    fn test_reads_records_in_page_order() {
        let extractor = SelectorExtractor::new("test", &config()).unwrap();
        let records = extractor.read(&viewport(PAGE), "list-42").unwrap();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.id, "1001");
        assert_eq!(first.author_handle, "alice");
        assert_eq!(first.content, "First post");
        assert_eq!(first.published_at, 1_709_294_400_000);
        assert_eq!(first.source_target_id, "list-42");
        assert_eq!(
            first.media_urls,
            vec![
                "https://social.example.com/media/a.jpg".to_string(),
                "https://cdn.example.com/b.jpg".to_string()
            ]
        );
        assert_eq!(first.engagement_counters["likes"], 1200);
        assert!(!first.is_repost);

        assert_eq!(records[1].id, "1002");
        assert!(records[1].is_repost);
        assert_eq!(records[1].engagement_counters["likes"], 0);
    }

    #[test]
    fn test_invalid_selector_fails_at_construction() {
        let mut config = config();
        config.item = "article[".to_string();
        assert!(matches!(
            SelectorExtractor::new("bad", &config),
            Err(ExtractionError::Selector { .. })
        ));
    }

    #[test]
    fn test_empty_viewport_is_malformed() {
        let extractor = SelectorExtractor::new("test", &config()).unwrap();
        assert!(matches!(
            extractor.read(&viewport("  "), "list-42"),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn test_items_without_ids_are_malformed() {
        let extractor = SelectorExtractor::new("test", &config()).unwrap();
        let html = r#"<article class="post"><div class="text">x</div></article>"#;
        assert!(matches!(
            extractor.read(&viewport(html), "list-42"),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn test_no_items_is_an_empty_frame() {
        let extractor = SelectorExtractor::new("test", &config()).unwrap();
        let records = extractor.read(&viewport("<p>loading</p>"), "list-42").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count("1.2K"), Some(1200));
        assert_eq!(parse_count("3M"), Some(3_000_000));
        assert_eq!(parse_count("12 replies"), Some(12));
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("Like"), None);
    }

    #[test]
    fn test_transforms() {
        assert_eq!(
            Transform::LastPathSegment.apply("https://x.com/a/status/99/?ref=1"),
            "99"
        );
        assert_eq!(Transform::Digits.apply("id-00123x"), "00123");
        assert_eq!(Transform::Handle.apply(" @someone "), "someone");
    }

    #[test]
    fn test_epoch_seconds_timestamp() {
        assert_eq!(
            parse_timestamp("1700000000", TimestampFormat::EpochS),
            Some(1_700_000_000_000)
        );
        assert_eq!(parse_timestamp("nope", TimestampFormat::EpochMs), None);
    }
}
