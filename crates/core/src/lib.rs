//! Core domain model, validation, history tracking, and traits.
//! No async and no IO within this crate.

pub mod errors;
pub mod field;
pub mod form;
pub mod history;
pub mod record;
pub mod traits;
pub mod uid;
pub mod validate;

pub use crate::errors::{StoreError, ValidationErrors};
pub use crate::field::{FieldDef, FieldKind};
pub use crate::form::{FormRegistry, FormSection};
pub use crate::history::diff_snapshots;
pub use crate::record::{
    Attachment, CaseRecord, Change, HistoryEntry, RecordId, RecordPayload, AUDIO_KEY_FIELD,
    CREATED_AT_FIELD, CREATED_BY_FIELD, LAST_UPDATED_AT_FIELD, LAST_UPDATED_BY_FIELD,
    LOCATION_FIELD, PHOTO_KEY_FIELD,
};
pub use crate::traits::{RecordStore, SearchHit, SearchIndex, SearchQuery};
pub use crate::uid::{create_unique_id, TokenSource, UuidTokenSource};
pub use crate::validate::validate_record;
