//! Validation of a merged record against the live schema.
//!
//! All violations are collected before the record is rejected; nothing
//! short-circuits at field level.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::errors::ValidationErrors;
use crate::field::{FieldDef, FieldKind};
use crate::record::CaseRecord;

pub const TEXT_FIELD_MAX_CHARS: usize = 200;
pub const TEXT_AREA_MAX_CHARS: usize = 400_000;

/// Accepted image payload content types.
pub const ACCEPTED_PHOTO_TYPES: &[&str] = &["image/png", "image/jpg", "image/jpeg"];
/// Accepted audio payload content types. Deliberately narrow: amr and mp3
/// only; wav and ogg are rejected.
pub const ACCEPTED_AUDIO_TYPES: &[&str] = &["audio/amr", "audio/mpeg"];

/// Day-month-year, e.g. `27 Feb 2010`.
pub const DATE_FORMAT: &str = "%d %b %Y";
const DATE_FORMAT_EXAMPLE: &str = "4 Feb 2010";

/// Field whose numeric value carries a domain range on top of the format rule.
const AGE_FIELD: &str = "age";
const AGE_MIN: f64 = 1.0;
const AGE_MAX: f64 = 99.0;

/// Pseudo-field key for the aggregate "record is empty" error.
pub const AT_LEAST_ONE_FIELD_KEY: &str = "has_at_least_one_field_value";
const AT_LEAST_ONE_FIELD_MESSAGE: &str = "Please fill in at least one field or upload a file";

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // At most one decimal digit.
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d)?$").expect("valid regex"))
}

/// Check the record's merged field map and attachments against the enabled
/// fields of the active schema. Unknown and disabled keys are not validated.
pub fn validate_record(
    record: &CaseRecord,
    enabled_fields: &[FieldDef],
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    for field in enabled_fields {
        let raw = record.field(&field.name).unwrap_or("");
        let value = raw.trim();
        if value.is_empty() && !field.kind.is_attachment() {
            continue;
        }
        match field.kind {
            FieldKind::Text => {
                if raw.chars().count() > TEXT_FIELD_MAX_CHARS {
                    errors.add(
                        &field.name,
                        format!(
                            "{} cannot be more than {} characters long",
                            field.display_name, TEXT_FIELD_MAX_CHARS
                        ),
                    );
                }
            }
            FieldKind::TextArea => {
                if raw.chars().count() > TEXT_AREA_MAX_CHARS {
                    errors.add(
                        &field.name,
                        format!(
                            "{} cannot be more than {} characters long",
                            field.display_name, TEXT_AREA_MAX_CHARS
                        ),
                    );
                }
            }
            FieldKind::Numeric => validate_numeric(field, value, &mut errors),
            FieldKind::Date => {
                if NaiveDate::parse_from_str(value, DATE_FORMAT).is_err() {
                    errors.add(
                        &field.name,
                        format!(
                            "{} must follow this format: {}",
                            field.display_name, DATE_FORMAT_EXAMPLE
                        ),
                    );
                }
            }
            FieldKind::Radio | FieldKind::Select => {
                if !field.option_strings.iter().any(|o| o == value) {
                    errors.add(
                        &field.name,
                        format!("{} must be one of the given options", field.display_name),
                    );
                }
            }
            FieldKind::Checkbox => {}
            FieldKind::Photo => {
                validate_attachment(record, field, ACCEPTED_PHOTO_TYPES, "image", &mut errors)
            }
            FieldKind::Audio => {
                validate_attachment(record, field, ACCEPTED_AUDIO_TYPES, "audio", &mut errors)
            }
        }
    }

    let any_value = enabled_fields
        .iter()
        .any(|f| !record.field(&f.name).unwrap_or("").trim().is_empty());
    if !any_value && record.attachments.is_empty() {
        errors.add(AT_LEAST_ONE_FIELD_KEY, AT_LEAST_ONE_FIELD_MESSAGE);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_numeric(field: &FieldDef, value: &str, errors: &mut ValidationErrors) {
    if !numeric_re().is_match(value) {
        errors.add(
            &field.name,
            format!("{} must be a valid number", field.display_name),
        );
        return;
    }
    if field.name == AGE_FIELD {
        let parsed: f64 = match value.parse() {
            Ok(v) => v,
            Err(_) => return,
        };
        if !(AGE_MIN..=AGE_MAX).contains(&parsed) {
            errors.add(
                &field.name,
                format!(
                    "{} must be between {} and {}",
                    field.display_name, AGE_MIN as u32, AGE_MAX as u32
                ),
            );
        }
    }
}

fn validate_attachment(
    record: &CaseRecord,
    field: &FieldDef,
    accepted: &[&str],
    noun: &str,
    errors: &mut ValidationErrors,
) {
    let key = match record.field(&field.name) {
        Some(k) if !k.trim().is_empty() => k,
        _ => return,
    };
    let attachment = match record.attachment_for_key(key) {
        Some(a) => a,
        None => return,
    };
    if !accepted.contains(&attachment.content_type.as_str()) {
        errors.add(
            &field.name,
            format!(
                "{} is not in a supported {} format",
                field.display_name, noun
            ),
        );
    }
}
