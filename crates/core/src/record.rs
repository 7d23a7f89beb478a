use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type RecordId = String;

/// Field that references the current photo attachment key.
pub const PHOTO_KEY_FIELD: &str = "current_photo_key";
/// Field that references the current audio attachment key.
pub const AUDIO_KEY_FIELD: &str = "recorded_audio";
pub const LOCATION_FIELD: &str = "last_known_location";
pub const CREATED_BY_FIELD: &str = "created_by";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const LAST_UPDATED_BY_FIELD: &str = "last_updated_by";
pub const LAST_UPDATED_AT_FIELD: &str = "last_updated_at";

/// A binary payload attached to a record, keyed by `<kind>-<timestamp>`.
/// Payload bytes serialize as base64 so persisted records stay readable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One field's before/after values inside a history entry. Raw, untrimmed
/// values; `None` where the field was absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// One append-only audit entry: who saved, when, and what changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_name: String,
    pub datetime: String,
    pub changes: BTreeMap<String, Change>,
}

/// The dynamic-schema aggregate: an open field map plus attachments and an
/// audit trail. Which keys are validated is decided by the live form
/// registry at save time; unknown keys flow through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Assigned by the store on first successful save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Optimistic-concurrency revision, maintained by the store.
    #[serde(default)]
    pub rev: u64,
    /// Derived once at creation, immutable thereafter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_identifier: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default, rename = "_attachments")]
    pub attachments: BTreeMap<String, Attachment>,
    /// Most-recent-first. Entries are never mutated or removed.
    #[serde(default)]
    pub histories: Vec<HistoryEntry>,
}

impl CaseRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Partial-update merge: every incoming entry overwrites, absent keys
    /// never erase existing values.
    pub fn merge_fields(&mut self, incoming: &BTreeMap<String, String>) {
        for (name, value) in incoming {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn attach(&mut self, key: impl Into<String>, attachment: Attachment) {
        self.attachments.insert(key.into(), attachment);
    }

    pub fn attachment_for_key(&self, key: &str) -> Option<&Attachment> {
        self.attachments.get(key)
    }

    fn attachment_for_field(&self, field: &str) -> Option<&Attachment> {
        let key = self.field(field)?;
        if key.trim().is_empty() {
            return None;
        }
        self.attachments.get(key)
    }

    /// The currently referenced photo, or `None` when the key field is
    /// blank or names no stored attachment.
    pub fn photo(&self) -> Option<&Attachment> {
        self.attachment_for_field(PHOTO_KEY_FIELD)
    }

    pub fn audio(&self) -> Option<&Attachment> {
        self.attachment_for_field(AUDIO_KEY_FIELD)
    }

    /// True when every save of this record was performed by its creator.
    pub fn has_one_interviewer(&self) -> bool {
        fn constrain<'a, F: FnMut(Option<&'a str>)>(f: F) -> F {
            f
        }
        let mut actors: Vec<&str> = Vec::new();
        let mut note = constrain(|name| {
            if let Some(name) = name {
                if !name.is_empty() && !actors.contains(&name) {
                    actors.push(name);
                }
            }
        });
        note(self.field(CREATED_BY_FIELD));
        note(self.field(LAST_UPDATED_BY_FIELD));
        for entry in &self.histories {
            note(Some(entry.user_name.as_str()));
        }
        actors.len() <= 1
    }

    /// Read-only projection for export/view collaborators: attachment
    /// metadata without payload bytes, plus the full audit trail.
    pub fn payload(&self) -> RecordPayload {
        RecordPayload {
            id: self.id.clone(),
            unique_identifier: self.unique_identifier.clone(),
            fields: self.fields.clone(),
            attachments: self
                .attachments
                .iter()
                .map(|(key, attachment)| {
                    (
                        key.clone(),
                        AttachmentMeta {
                            content_type: attachment.content_type.clone(),
                            length: attachment.len(),
                        },
                    )
                })
                .collect(),
            histories: self.histories.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachmentMeta {
    pub content_type: String,
    pub length: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordPayload {
    pub id: Option<RecordId>,
    pub unique_identifier: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub attachments: BTreeMap<String, AttachmentMeta>,
    pub histories: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(fields: &[(&str, &str)]) -> CaseRecord {
        let mut record = CaseRecord::new();
        for (name, value) in fields {
            record.set_field(*name, *value);
        }
        record
    }

    #[test]
    fn merge_overwrites_only_incoming_keys() {
        let mut record = record_with(&[("origin", "Croydon"), ("last_known_location", "London")]);
        let mut incoming = BTreeMap::new();
        incoming.insert("last_known_location".to_string(), "Manchester".to_string());
        record.merge_fields(&incoming);
        assert_eq!(record.field("last_known_location"), Some("Manchester"));
        assert_eq!(record.field("origin"), Some("Croydon"));
    }

    #[test]
    fn photo_is_none_without_attachment() {
        let record = CaseRecord::new();
        assert!(record.photo().is_none());
    }

    #[test]
    fn photo_is_none_for_blank_key() {
        let record = record_with(&[(PHOTO_KEY_FIELD, "")]);
        assert!(record.photo().is_none());
    }

    #[test]
    fn audio_is_none_when_key_names_no_attachment() {
        let record = record_with(&[(AUDIO_KEY_FIELD, "ThisIsNotAnAttachmentName")]);
        assert!(record.audio().is_none());
    }

    #[test]
    fn photo_resolves_referenced_attachment() {
        let mut record = record_with(&[(PHOTO_KEY_FIELD, "photo-20100120T171032")]);
        record.attach(
            "photo-20100120T171032",
            Attachment::new("image/jpeg", vec![1, 2, 3]),
        );
        assert_eq!(record.photo().map(Attachment::len), Some(3));
    }

    #[test]
    fn one_interviewer_when_created_and_never_updated() {
        let record = record_with(&[(CREATED_BY_FIELD, "john")]);
        assert!(record.has_one_interviewer());
    }

    #[test]
    fn one_interviewer_when_all_saves_by_creator() {
        let mut record = record_with(&[(CREATED_BY_FIELD, "john"), (LAST_UPDATED_BY_FIELD, "john")]);
        record.histories.push(HistoryEntry {
            user_name: "john".to_string(),
            datetime: "03/02/2011 21:48".to_string(),
            changes: BTreeMap::new(),
        });
        assert!(record.has_one_interviewer());
    }

    #[test]
    fn several_interviewers_when_another_user_updates() {
        let mut record = record_with(&[(CREATED_BY_FIELD, "john"), (LAST_UPDATED_BY_FIELD, "jane")]);
        record.histories.push(HistoryEntry {
            user_name: "jane".to_string(),
            datetime: "03/02/2011 21:48".to_string(),
            changes: BTreeMap::new(),
        });
        assert!(!record.has_one_interviewer());
    }

    #[test]
    fn payload_exposes_lengths_not_bytes() {
        let mut record = record_with(&[("name", "Bob")]);
        record.attach("photo-20100120T171032", Attachment::new("image/png", vec![0; 42]));
        let payload = record.payload();
        let meta = &payload.attachments["photo-20100120T171032"];
        assert_eq!(meta.length, 42);
        assert_eq!(meta.content_type, "image/png");
    }

    #[test]
    fn attachment_bytes_round_trip_through_json() {
        let attachment = Attachment::new("audio/amr", vec![7, 8, 9, 250]);
        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains("\"data\":\""));
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attachment);
    }
}
