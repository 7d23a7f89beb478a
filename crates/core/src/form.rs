use serde::{Deserialize, Serialize};

use crate::errors::ValidationErrors;
use crate::field::FieldDef;

/// An ordered, named group of field definitions making up one configurable
/// form. Maintained by schema administration; the record engine only reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub unique_id: String,
    pub name: String,
    pub order: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

fn enabled_default() -> bool {
    true
}

impl FormSection {
    pub fn new(unique_id: impl Into<String>) -> Self {
        let unique_id = unique_id.into();
        Self {
            name: unique_id.clone(),
            unique_id,
            order: 0,
            enabled: true,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn add_field(&mut self, field: FieldDef) {
        self.fields.push(field);
    }

    fn enabled_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.enabled)
    }
}

/// The live schema: every form section the administrator has configured.
///
/// The engine reads this registry fresh on each validation call, so schema
/// edits take effect on the next save rather than being cached stale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormRegistry {
    sections: Vec<FormSection>,
}

impl FormRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sections(sections: Vec<FormSection>) -> Self {
        let mut registry = Self { sections };
        registry.sort_sections();
        registry
    }

    pub fn add_section(&mut self, section: FormSection) {
        self.sections.push(section);
        self.sort_sections();
    }

    pub fn sections(&self) -> &[FormSection] {
        &self.sections
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }

    fn sort_sections(&mut self) {
        self.sections.sort_by_key(|s| s.order);
    }

    /// All enabled fields of all enabled sections, in display order.
    pub fn enabled_fields(&self) -> Vec<FieldDef> {
        self.sections
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| s.enabled_fields().cloned())
            .collect()
    }

    pub fn enabled_field_names(&self) -> Vec<String> {
        self.enabled_fields()
            .into_iter()
            .map(|f| f.name)
            .collect()
    }

    /// The enabled section (other than `excluding_section`) that already
    /// defines an enabled field called `name`, if any.
    pub fn section_defining(
        &self,
        name: &str,
        excluding_section: Option<&str>,
    ) -> Option<&FormSection> {
        self.sections
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| excluding_section != Some(s.unique_id.as_str()))
            .find(|s| s.enabled_fields().any(|f| f.name == name))
    }

    pub fn is_unique_name(&self, name: &str, excluding_section: Option<&str>) -> bool {
        self.section_defining(name, excluding_section).is_none()
    }

    /// Admin-side validation of a candidate field against one section: the
    /// definition itself plus name uniqueness within the section and across
    /// every other enabled section (naming the offending form).
    pub fn validate_field_for_section(
        &self,
        section: &FormSection,
        field: &FieldDef,
    ) -> ValidationErrors {
        let mut errors = field.validate_definition();
        let within = section
            .fields
            .iter()
            .filter(|existing| !std::ptr::eq(*existing, field))
            .any(|existing| existing.name == field.name);
        if within {
            errors.add("name", "Field already exists on this form");
        } else if let Some(other) =
            self.section_defining(&field.name, Some(section.unique_id.as_str()))
        {
            errors.add(
                "name",
                format!("Field already exists on form '{}'", other.name),
            );
        }
        errors
    }
}
