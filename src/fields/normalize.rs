use serde_json::{Map, Value};

use super::{ColumnType, FieldKind, FormField, NormalizeTarget, TableColumn, coerce, html};
use crate::integrations::field::IntegrationFieldType;

impl FormField {
    /// Canonical string form, as used in templates and plain-text payloads.
    pub fn value_as_string(&self, raw: &Value) -> String {
        match &self.kind {
            FieldKind::Phone => phone_string(raw),
            FieldKind::Agree {
                checked_value,
                unchecked_value,
            } => agree_string(raw, checked_value, unchecked_value),
            kind if !kind.options().is_empty() => option_values(raw).join(", "),
            kind if kind.is_relation() => elements(raw)
                .iter()
                .filter_map(|e| display_attribute(kind, e))
                .collect::<Vec<_>>()
                .join(", "),
            FieldKind::Repeater { .. } | FieldKind::Group { .. } | FieldKind::Table { .. } => {
                if raw.is_null() {
                    String::new()
                } else {
                    raw.to_string()
                }
            }
            FieldKind::Payment { .. } => String::new(),
            _ => coerce::scalar_string(raw).unwrap_or_default(),
        }
    }

    /// Human-readable form: option labels instead of values, file names
    /// instead of URLs, one line per nested field.
    pub fn value_for_summary(&self, raw: &Value) -> String {
        match &self.kind {
            kind if !kind.options().is_empty() => option_values(raw)
                .iter()
                .map(|value| {
                    kind.options()
                        .iter()
                        .find(|opt| opt.value == *value)
                        .map(|opt| opt.label.clone())
                        .unwrap_or_else(|| value.clone())
                })
                .collect::<Vec<_>>()
                .join(", "),
            FieldKind::MultiLineText { rich_text: true } => {
                raw.as_str().map(html::strip_tags).unwrap_or_default()
            }
            FieldKind::FileUpload => elements(raw)
                .iter()
                .filter_map(|e| attribute(e, "filename").or_else(|| attribute(e, "title")))
                .collect::<Vec<_>>()
                .join(", "),
            FieldKind::Repeater { fields } => rows(raw)
                .iter()
                .map(|row| summary_lines(fields, row))
                .collect::<Vec<_>>()
                .join("\n\n"),
            FieldKind::Group { fields } => summary_lines(fields, raw),
            FieldKind::Table { columns } => rows(raw)
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .filter_map(|col| {
                            let cell = coerce::scalar_string(row.get(&col.handle)?)?;
                            let heading = if col.heading.is_empty() { &col.handle } else { &col.heading };
                            Some(format!("{heading}: {cell}"))
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .collect::<Vec<_>>()
                .join("\n"),
            _ => self.value_as_string(raw),
        }
    }

    /// Typed value for an external slot. Array slots always get a list;
    /// anything unresolvable becomes `null` or `[]`.
    pub fn value_for_integration(&self, raw: &Value, target: &NormalizeTarget) -> Value {
        let native = self.integration_native(raw, target);
        coerce::to_type(native, target.field_type)
    }

    fn integration_native(&self, raw: &Value, target: &NormalizeTarget) -> Value {
        match &self.kind {
            FieldKind::MultiLineText { rich_text: true } => match raw.as_str() {
                Some(s) if target.accepts_markup => Value::String(html::decode_entities(s)),
                Some(s) => Value::String(html::strip_tags(s)),
                None => Value::Null,
            },
            FieldKind::Phone => {
                let phone = phone_string(raw);
                if phone.is_empty() { Value::Null } else { Value::String(phone) }
            }
            FieldKind::Agree {
                checked_value,
                unchecked_value,
            } => match target.field_type {
                IntegrationFieldType::String => {
                    Value::String(agree_string(raw, checked_value, unchecked_value))
                }
                _ => Value::Bool(coerce::is_truthy(raw)),
            },
            kind if kind.is_multi_option() => {
                Value::Array(option_values(raw).into_iter().map(Value::String).collect())
            }
            kind if !kind.options().is_empty() => option_values(raw)
                .into_iter()
                .next()
                .map(Value::String)
                .unwrap_or(Value::Null),
            kind if kind.is_relation() => {
                let items = elements(raw);
                let values = if target.relations_as_ids {
                    items.iter().filter_map(|e| element_id(e)).collect()
                } else {
                    items
                        .iter()
                        .filter_map(|e| display_attribute(kind, e))
                        .map(Value::String)
                        .collect()
                };
                Value::Array(values)
            }
            FieldKind::Repeater { fields } => Value::Array(
                rows(raw)
                    .iter()
                    .map(|row| nested_row(fields, row, target))
                    .collect(),
            ),
            FieldKind::Group { fields } => {
                if raw.is_object() {
                    nested_row(fields, raw, target)
                } else {
                    Value::Null
                }
            }
            FieldKind::Table { columns } => Value::Array(
                rows(raw)
                    .iter()
                    .map(|row| table_row(columns, row))
                    .collect(),
            ),
            FieldKind::Payment { .. } => Value::Null,
            _ => raw.clone(),
        }
    }
}

fn nested_row(fields: &[FormField], row: &Value, target: &NormalizeTarget) -> Value {
    let mut map = Map::new();
    for field in fields {
        let raw = row.get(&field.handle).unwrap_or(&Value::Null);
        let nested_target = target.with_type(field.kind.natural_type());
        map.insert(
            field.handle.clone(),
            field.value_for_integration(raw, &nested_target),
        );
    }
    Value::Object(map)
}

fn table_row(columns: &[TableColumn], row: &Value) -> Value {
    let mut map = Map::new();
    for column in columns {
        let raw = row.get(&column.handle).cloned().unwrap_or(Value::Null);
        let field_type = match column.column_type {
            ColumnType::Number => IntegrationFieldType::Float,
            ColumnType::Checkbox => IntegrationFieldType::Boolean,
            ColumnType::Date => IntegrationFieldType::Date,
            _ => IntegrationFieldType::String,
        };
        map.insert(column.handle.clone(), coerce::to_type(raw, field_type));
    }
    Value::Object(map)
}

fn summary_lines(fields: &[FormField], row: &Value) -> String {
    fields
        .iter()
        .filter_map(|field| {
            let raw = row.get(&field.handle)?;
            let summary = field.value_for_summary(raw);
            let label = if field.label.is_empty() { &field.handle } else { &field.label };
            (!summary.is_empty()).then(|| format!("{label}: {summary}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn rows(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.iter().filter(|r| r.is_object()).cloned().collect(),
        Value::Object(map) => match map.get("rows") {
            Some(Value::Array(items)) => items.iter().filter(|r| r.is_object()).cloned().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn option_values(raw: &Value) -> Vec<String> {
    coerce::flatten(raw.clone())
        .iter()
        .filter_map(coerce::scalar_string)
        .filter(|s| !s.is_empty())
        .collect()
}

fn agree_string(raw: &Value, checked: &str, unchecked: &str) -> String {
    if coerce::is_truthy(raw) {
        checked.to_string()
    } else {
        unchecked.to_string()
    }
}

fn phone_string(raw: &Value) -> String {
    match raw {
        Value::Object(map) => {
            let number = map.get("number").and_then(|n| n.as_str()).unwrap_or("");
            match map.get("country").and_then(|c| c.as_str()) {
                Some(country) if !country.is_empty() && !number.is_empty() => {
                    format!("{number} ({country})")
                }
                _ => number.to_string(),
            }
        }
        other => coerce::scalar_string(other).unwrap_or_default(),
    }
}

/// Related elements as submitted: bare ids or objects carrying at least an id.
fn elements(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).cloned().collect(),
        Value::Object(_) | Value::Number(_) => vec![raw.clone()],
        Value::String(s) if !s.is_empty() => vec![raw.clone()],
        _ => Vec::new(),
    }
}

fn element_id(element: &Value) -> Option<Value> {
    match element {
        Value::Object(map) => map.get("id").filter(|id| !id.is_null()).cloned(),
        Value::Number(_) | Value::String(_) => Some(element.clone()),
        _ => None,
    }
}

fn attribute(element: &Value, key: &str) -> Option<String> {
    element
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn display_attribute(kind: &FieldKind, element: &Value) -> Option<String> {
    if !element.is_object() {
        return coerce::scalar_string(element);
    }
    match kind {
        FieldKind::FileUpload => attribute(element, "url").or_else(|| attribute(element, "filename")),
        FieldKind::Users => attribute(element, "email").or_else(|| attribute(element, "title")),
        _ => attribute(element, "title").or_else(|| attribute(element, "url")),
    }
}
