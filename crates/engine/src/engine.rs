use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use casebook_core::{
    create_unique_id, diff_snapshots, validate_record, Attachment, CaseRecord, FormRegistry,
    HistoryEntry, RecordStore, SearchIndex, SearchQuery, StoreError, TokenSource, UuidTokenSource,
    ValidationErrors, AUDIO_KEY_FIELD, CREATED_AT_FIELD, CREATED_BY_FIELD, LAST_UPDATED_AT_FIELD,
    LAST_UPDATED_BY_FIELD, LOCATION_FIELD, PHOTO_KEY_FIELD,
};

use crate::clock::{Clock, SystemClock};

/// Caller-visible failures of the record aggregate. Index-adapter failures
/// never appear here; they are logged and swallowed at this boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    /// Stale-revision save; the caller should re-read and retry. Never
    /// retried automatically.
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            conflict @ StoreError::Conflict { .. } => EngineError::Conflict(conflict.to_string()),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

/// `2010-01-17 19:05:00UTC`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%Z").to_string()
}

/// `photo-20100120T171032`, `audio-20100120T171032`
pub fn attachment_key(kind: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", kind, at.format("%Y%m%dT%H%M%S"))
}

pub struct RecordEngine<S, I> {
    store: S,
    index: I,
    registry: Arc<RwLock<FormRegistry>>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenSource>,
}

impl<S: RecordStore, I: SearchIndex> RecordEngine<S, I> {
    pub fn new(store: S, index: I, registry: Arc<RwLock<FormRegistry>>) -> Self {
        Self::with_parts(
            store,
            index,
            registry,
            Arc::new(SystemClock),
            Arc::new(UuidTokenSource),
        )
    }

    pub fn with_parts(
        store: S,
        index: I,
        registry: Arc<RwLock<FormRegistry>>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            clock,
            tokens,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new record from the given field values and optional
    /// attachments. Stamps provenance, derives the immutable identifier,
    /// validates against the live schema, persists, then notifies the index
    /// best-effort. Creation writes no history.
    pub fn create(
        &self,
        user_name: &str,
        field_values: &BTreeMap<String, String>,
        photo: Option<Attachment>,
        audio: Option<Attachment>,
    ) -> Result<CaseRecord, EngineError> {
        let now = self.clock.now();
        let mut record = CaseRecord::new();
        record.merge_fields(field_values);
        record.set_field(CREATED_BY_FIELD, user_name);
        record.set_field(CREATED_AT_FIELD, format_timestamp(now));
        record.unique_identifier = Some(create_unique_id(
            user_name,
            record.field(LOCATION_FIELD),
            self.tokens.as_ref(),
        ));
        if let Some(photo) = photo {
            store_attachment(&mut record, "photo", PHOTO_KEY_FIELD, photo, now);
        }
        if let Some(audio) = audio {
            store_attachment(&mut record, "audio", AUDIO_KEY_FIELD, audio, now);
        }
        self.validate(&record)?;
        let saved = self.store.save(&record)?;
        debug!(record_id = ?saved.id, "record created");
        self.notify_index(&saved);
        Ok(saved)
    }

    /// Merge a partial update onto the stored record: absent incoming keys
    /// never overwrite existing values. Attachment replacement/removal is
    /// recorded as an ordinary field change on the key field. A non-empty
    /// diff against the pre-merge snapshot prepends exactly one history
    /// entry; a save that changes nothing appends none.
    pub fn update(
        &self,
        id: &str,
        user_name: &str,
        new_photo: Option<Attachment>,
        delete_photo: bool,
        new_audio: Option<Attachment>,
        field_values: &BTreeMap<String, String>,
    ) -> Result<CaseRecord, EngineError> {
        let mut record = self
            .store
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let before = record.fields.clone();

        record.merge_fields(field_values);
        let now = self.clock.now();
        record.set_field(LAST_UPDATED_BY_FIELD, user_name);
        record.set_field(LAST_UPDATED_AT_FIELD, format_timestamp(now));
        if delete_photo {
            record.fields.remove(PHOTO_KEY_FIELD);
        }
        if let Some(photo) = new_photo {
            store_attachment(&mut record, "photo", PHOTO_KEY_FIELD, photo, now);
        }
        if let Some(audio) = new_audio {
            store_attachment(&mut record, "audio", AUDIO_KEY_FIELD, audio, now);
        }

        let changes = diff_snapshots(&before, &record.fields);
        if !changes.is_empty() {
            let datetime = record
                .field(LAST_UPDATED_AT_FIELD)
                .unwrap_or_default()
                .to_string();
            record.histories.insert(
                0,
                HistoryEntry {
                    user_name: user_name.to_string(),
                    datetime,
                    changes,
                },
            );
        }

        self.validate(&record)?;
        let saved = self.store.save(&record)?;
        debug!(record_id = ?saved.id, rev = saved.rev, "record updated");
        self.notify_index(&saved);
        Ok(saved)
    }

    /// Remove the record permanently. Terminal: no further operations are
    /// defined on the identity afterwards. Stale index entries are filtered
    /// out at search time and dropped for good on the next reindex.
    pub fn destroy(&self, id: &str) -> Result<(), EngineError> {
        self.store.delete(id)?;
        debug!(record_id = id, "record destroyed");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<CaseRecord>, EngineError> {
        Ok(self.store.get(id)?)
    }

    /// Invalid queries return empty without touching the index. Hits are
    /// resolved through the authoritative store in index order; hits whose
    /// record has vanished are dropped. Index failures yield empty results,
    /// never errors.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<CaseRecord>, EngineError> {
        if !query.is_valid() {
            return Ok(Vec::new());
        }
        if let Err(err) = self.ensure_index_ready() {
            warn!(error = %err, "search index unavailable; returning no results");
            return Ok(Vec::new());
        }
        let hits = match self.index.search(query) {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "search failed; returning no results");
                return Ok(Vec::new());
            }
        };
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(record) = self.store.get(&hit.id)? {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Wipe the index, rebuild its schema from the live registry, and index
    /// every stored record. Returns the number of records indexed; index
    /// failures are logged, not raised.
    pub fn reindex_all(&self) -> Result<usize, EngineError> {
        if let Err(err) = self.index.remove_all() {
            warn!(error = %err, "could not clear search index");
            return Ok(0);
        }
        let names = self.registry.read().enabled_field_names();
        if let Err(err) = self.index.ensure_schema(&names) {
            warn!(error = %err, "could not rebuild search index schema");
            return Ok(0);
        }
        let mut indexed = 0;
        for record in self.store.all()? {
            match self.index.index(&record) {
                Ok(()) => indexed += 1,
                Err(err) => warn!(record_id = ?record.id, error = %err, "could not index record"),
            }
        }
        Ok(indexed)
    }

    fn validate(&self, record: &CaseRecord) -> Result<(), EngineError> {
        // Read the registry fresh on every call: no stale-schema validation
        // after an administrator edit.
        let enabled = self.registry.read().enabled_fields();
        validate_record(record, &enabled).map_err(EngineError::Validation)
    }

    /// Idempotent schema setup, invoked lazily before index use. A rebuilt
    /// index is repopulated from the store so schema edits do not lose
    /// already-indexed records.
    fn ensure_index_ready(&self) -> Result<(), String> {
        let names = self.registry.read().enabled_field_names();
        let rebuilt = self
            .index
            .ensure_schema(&names)
            .map_err(|e| e.to_string())?;
        if rebuilt {
            for record in self.store.all().map_err(|e| e.to_string())? {
                self.index.index(&record).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    /// Fire-and-forget post-persist hook: invoked exactly once per
    /// successful save, failures logged and swallowed.
    fn notify_index(&self, record: &CaseRecord) {
        let result = self
            .ensure_index_ready()
            .and_then(|_| self.index.index(record).map_err(|e| e.to_string()));
        if let Err(err) = result {
            warn!(
                record_id = ?record.id,
                error = %err,
                "problem indexing record for searching; save is unaffected"
            );
        }
    }
}

fn store_attachment(
    record: &mut CaseRecord,
    kind: &str,
    key_field: &str,
    attachment: Attachment,
    at: DateTime<Utc>,
) {
    let key = attachment_key(kind, at);
    record.attach(key.clone(), attachment);
    record.set_field(key_field, key);
}
