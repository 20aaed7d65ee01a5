use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fields::FieldOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationFieldType {
    #[default]
    String,
    Number,
    Float,
    Boolean,
    Array,
    Date,
    Datetime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationFieldOptions {
    #[serde(default)]
    pub label: String,
    pub options: Vec<FieldOption>,
}

/// One addressable slot on the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationField {
    pub handle: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: IntegrationFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<IntegrationFieldOptions>,
}

impl IntegrationField {
    pub fn new(handle: &str, name: &str, field_type: IntegrationFieldType) -> Self {
        Self {
            handle: handle.to_string(),
            name: name.to_string(),
            field_type,
            required: false,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, label: &str, options: Vec<FieldOption>) -> Self {
        self.options = Some(IntegrationFieldOptions {
            label: label.to_string(),
            options,
        });
        self
    }
}

/// A remote list or object type that carries its own field set, e.g. a
/// mailing list with custom fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<IntegrationField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingsGroup {
    Fields(Vec<IntegrationField>),
    Collections(Vec<IntegrationCollection>),
}

/// Everything an integration exposes for mapping, keyed by group
/// (`contact`, `lists`, `profile`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationFormSettings {
    #[serde(default)]
    pub collections: BTreeMap<String, SettingsGroup>,
}

impl IntegrationFormSettings {
    pub fn with_fields(mut self, group: &str, fields: Vec<IntegrationField>) -> Self {
        self.collections
            .insert(group.to_string(), SettingsGroup::Fields(fields));
        self
    }

    pub fn with_collections(mut self, group: &str, collections: Vec<IntegrationCollection>) -> Self {
        self.collections
            .insert(group.to_string(), SettingsGroup::Collections(collections));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn fields(&self, group: &str) -> &[IntegrationField] {
        match self.collections.get(group) {
            Some(SettingsGroup::Fields(fields)) => fields,
            _ => &[],
        }
    }

    pub fn collection(&self, group: &str, id: &str) -> Option<&IntegrationCollection> {
        match self.collections.get(group) {
            Some(SettingsGroup::Collections(items)) => items.iter().find(|c| c.id == id),
            _ => None,
        }
    }

    /// Search every collection group for `id`.
    pub fn find_collection(&self, id: &str) -> Option<&IntegrationCollection> {
        self.collections.values().find_map(|group| match group {
            SettingsGroup::Collections(items) => items.iter().find(|c| c.id == id),
            SettingsGroup::Fields(_) => None,
        })
    }

    /// Drop fields without a handle; they cannot be mapped or sent.
    pub fn sanitized(mut self, integration: &str) -> Self {
        let mut dropped = 0usize;
        let mut keep = |field: &IntegrationField| {
            let ok = !field.handle.trim().is_empty();
            if !ok {
                dropped += 1;
            }
            ok
        };

        for group in self.collections.values_mut() {
            match group {
                SettingsGroup::Fields(fields) => fields.retain(&mut keep),
                SettingsGroup::Collections(items) => {
                    for item in items.iter_mut() {
                        item.fields.retain(&mut keep);
                    }
                }
            }
        }

        if dropped > 0 {
            tracing::warn!(integration, dropped, "Dropped integration fields without a handle");
        }
        self
    }
}
