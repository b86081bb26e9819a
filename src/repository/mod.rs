//! Repository layer for durable persistence.
//!
//! The crawl engine depends on two narrow traits: `RecordStore` for
//! existence checks and upserts keyed by `(target_id, record_id)`, and
//! `JobStatusStore` for the durable job-status mirror. `DbContext` provides
//! the Diesel/SQLite implementations; `memory` provides in-process ones.

pub mod context;
pub mod jobs;
pub mod memory;
pub mod models;
pub mod pool;
pub mod records;
pub mod util;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Record, TaskResult};

pub use context::DbContext;
pub use jobs::DieselJobRepository;
pub use memory::{InMemoryJobStore, InMemoryRecordStore};
pub use pool::{DbError, SqlitePool};
pub use records::DieselRecordRepository;
pub use util::{parse_datetime, parse_datetime_opt};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "storage_serialization",
            Self::Database(_) | Self::Unavailable(_) => "storage_unavailable",
        }
    }
}

/// Durable record storage.
///
/// Implementations must tolerate concurrent `upsert` calls for the same key
/// from different jobs: the first write wins the insert, later ones update.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether `(target_id, id)` has been persisted by any run.
    async fn exists(&self, id: &str, target_id: &str) -> Result<bool, PersistenceError>;

    /// Insert the record, or refresh its mutable fields if already present.
    /// Returns `true` when the record was newly inserted.
    async fn upsert(&self, record: &Record) -> Result<bool, PersistenceError>;
}

/// Durable mirror of job lifecycle.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn mark_running(&self, job_id: Uuid, target_id: &str) -> Result<(), PersistenceError>;

    async fn mark_completed(
        &self,
        job_id: Uuid,
        summary: &TaskResult,
    ) -> Result<(), PersistenceError>;

    async fn mark_failed(&self, job_id: Uuid, summary: &TaskResult)
        -> Result<(), PersistenceError>;

    /// Demote every `running` row to `failed`; returns how many were changed.
    ///
    /// Only safe when no job is running in any process sharing the store,
    /// i.e. after startup or `force_reset`.
    async fn fail_orphaned(&self, reason: &str) -> Result<u64, PersistenceError>;
}
