//! listcrawl - infinite-scroll timeline crawler.
//!
//! Drives a headless browser through a timeline, extracts structured records,
//! decides after every scroll whether to keep going, and persists each record
//! exactly once per target.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod jobs;
pub mod models;
pub mod repository;
pub mod schema;
