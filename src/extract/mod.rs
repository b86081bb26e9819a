//! Record extraction from rendered pages.
//!
//! Site markup is not the engine's business: an `Extractor` turns a viewport
//! into records and the crawl loop only sees the result.

mod selector;

use thiserror::Error;

use crate::browser::Viewport;
use crate::models::Record;

pub use selector::{
    parse_count, FieldRule, SelectorConfig, SelectorExtractor, TimestampFormat, TimestampRule,
    Transform,
};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Malformed page: {0}")]
    Malformed(String),
    #[error("Invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

impl ExtractionError {
    pub fn code(&self) -> &'static str {
        "extraction_failed"
    }
}

/// Reads the records currently visible in a viewport.
///
/// Must return records in on-page order; the crawl loop classifies them in
/// that order.
pub trait Extractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn read(&self, viewport: &Viewport, target_id: &str) -> Result<Vec<Record>, ExtractionError>;
}
