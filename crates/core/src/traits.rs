use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::record::{CaseRecord, RecordId};

/// Authoritative record storage.
///
/// Implementations assign ids on first save, bump the revision on every
/// save, and fail a stale-revision save with `StoreError::Conflict` so the
/// caller can distinguish it from validation failure and retry with a fresh
/// read. The engine never retries on its own.
pub trait RecordStore: Send + Sync {
    /// Persist the record; returns the stored copy with id and revision set.
    fn save(&self, record: &CaseRecord) -> Result<CaseRecord, StoreError>;

    fn get(&self, id: &str) -> Result<Option<CaseRecord>, StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Every stored record, ordered by the `name` field with blank names
    /// first.
    fn all(&self) -> Result<Vec<CaseRecord>, StoreError>;
}

/// A free-text query against the search index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// Invalid queries short-circuit to empty results without touching the
    /// index.
    pub fn is_valid(&self) -> bool {
        !self.query.trim().is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: RecordId,
    pub score: f32,
}

/// Best-effort projection of records into an external full-text index.
///
/// Failures here must never fail a record save; the engine logs and moves
/// on. The schema is derived from the enabled field names plus the
/// identifier field and re-established whenever the form registry changes.
pub trait SearchIndex: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Idempotently (re)build the index schema for the given enabled field
    /// names. Returns `true` when the index was rebuilt and needs
    /// repopulating from the authoritative store.
    fn ensure_schema(&self, field_names: &[String]) -> Result<bool, Self::Error>;

    fn index(&self, record: &CaseRecord) -> Result<(), Self::Error>;

    fn remove_all(&self) -> Result<(), Self::Error>;

    /// Fuzzy/prefix match over indexed text fields plus exact match on the
    /// identifier field, ordered by relevance.
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, Self::Error>;
}
