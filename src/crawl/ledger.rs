//! Run-scoped duplicate classification.

use std::collections::HashSet;
use std::sync::Arc;

use crate::repository::{PersistenceError, RecordStore};

/// How a record relates to what has already been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First sighting, not in storage.
    New,
    /// Already seen earlier in this run (the page re-rendered it).
    TaskLocal,
    /// First sighting in this run but stored by an earlier one.
    Persisted,
}

/// Classifies record ids against this run's sightings and durable storage.
///
/// Storage answers are never cached beyond the run: a new ledger starts with
/// an empty `processed` set.
pub struct DedupLedger {
    target_id: String,
    processed: HashSet<String>,
    store: Arc<dyn RecordStore>,
}

impl DedupLedger {
    pub fn new(target_id: impl Into<String>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            target_id: target_id.into(),
            processed: HashSet::new(),
            store,
        }
    }

    /// Classify a record id and remember it.
    ///
    /// A failed storage lookup leaves the id unrecorded so that a later
    /// frame showing the same record classifies it again.
    pub async fn classify(&mut self, id: &str) -> Result<Classification, PersistenceError> {
        if self.processed.contains(id) {
            return Ok(Classification::TaskLocal);
        }

        let persisted = self.store.exists(id, &self.target_id).await?;
        self.processed.insert(id.to_string());

        Ok(if persisted {
            Classification::Persisted
        } else {
            Classification::New
        })
    }

    /// Remember an id without consulting storage. Returns `true` on first sighting.
    pub fn observe(&mut self, id: &str) -> bool {
        self.processed.insert(id.to_string())
    }

    #[cfg(test)]
    fn seen(&self) -> usize {
        self.processed.len()
    }
}
