use serde::{Deserialize, Serialize};

use crate::errors::ValidationErrors;

/// The value shape a field definition describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextArea,
    Numeric,
    Date,
    Radio,
    Select,
    Checkbox,
    Photo,
    Audio,
}

impl FieldKind {
    /// Kinds whose values are chosen from a fixed option list.
    pub fn has_options(self) -> bool {
        matches!(self, FieldKind::Radio | FieldKind::Select)
    }

    pub fn is_attachment(self) -> bool {
        matches!(self, FieldKind::Photo | FieldKind::Audio)
    }
}

/// One administrator-configured schema attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub display_name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub option_strings: Vec<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            kind,
            option_strings: Vec::new(),
            enabled: true,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn text_area(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::TextArea)
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Numeric)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn radio(name: impl Into<String>, options: &[&str]) -> Self {
        let mut field = Self::new(name, FieldKind::Radio);
        field.option_strings = options.iter().map(|s| s.to_string()).collect();
        field
    }

    pub fn select(name: impl Into<String>, options: &[&str]) -> Self {
        let mut field = Self::new(name, FieldKind::Select);
        field.option_strings = options.iter().map(|s| s.to_string()).collect();
        field
    }

    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Checkbox)
    }

    pub fn photo_upload(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Photo)
    }

    pub fn audio_upload(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Audio)
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The value a fresh record carries for this field before any input.
    /// Attachment fields have no default; their key fields are set when a
    /// payload is stored.
    pub fn default_value(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Text
            | FieldKind::TextArea
            | FieldKind::Numeric
            | FieldKind::Date
            | FieldKind::Radio
            | FieldKind::Select => Some(""),
            FieldKind::Checkbox => Some("No"),
            FieldKind::Photo | FieldKind::Audio => None,
        }
    }

    /// Definition-level checks, independent of any form it belongs to.
    pub fn validate_definition(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.display_name.trim().is_empty() {
            errors.add("display_name", "Display name must not be blank");
        }
        if self.kind.has_options() && self.option_strings.len() < 2 {
            errors.add("option_strings", "Field must have at least 2 options");
        }
        errors
    }
}
