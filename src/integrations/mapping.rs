use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::field::{IntegrationField, IntegrationFieldType};
use super::template::{self, TemplateContext};
use super::{HookChain, IntegrationKind, IntegrationProvider, SendContext};
use crate::fields::{FieldKind, FormField, NormalizeTarget, coerce};
use crate::models::{Form, Integration, Submission};

static FIELD_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([A-Za-z0-9_]+)(?:\[([A-Za-z0-9_]+)\])?\}$").unwrap());

/// Everything value resolution needs to know about where a value is going.
pub struct MappingContext<'a> {
    pub form: &'a Form,
    pub submission: &'a Submission,
    pub integration: &'a Integration,
    pub kind: IntegrationKind,
    pub accepts_markup: bool,
    pub relations_as_ids: bool,
    pub hooks: &'a HookChain,
    pub provider: Option<&'a dyn IntegrationProvider>,
}

impl<'a> MappingContext<'a> {
    pub fn for_send(ctx: &SendContext<'a>, provider: &'a dyn IntegrationProvider) -> Self {
        Self {
            form: ctx.form,
            submission: ctx.submission,
            integration: ctx.ctx.integration,
            kind: provider.kind(),
            accepts_markup: provider.accepts_markup(),
            relations_as_ids: provider.relations_as_ids(),
            hooks: ctx.ctx.hooks,
            provider: Some(provider),
        }
    }
}

/// Resolve a mapping into `{external_handle: value}`.
///
/// Only slots in `schema` are considered, and only those with a non-empty
/// mapping entry. With an empty schema every mapped handle is resolved as a
/// string. Unless `overwrite_values` is set, slots that resolve to nothing
/// are left out so they don't clobber existing remote data.
pub fn resolve(
    ctx: &MappingContext<'_>,
    mapping: Option<&BTreeMap<String, String>>,
    schema: &[IntegrationField],
    overwrite_values: bool,
) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(mapping) = mapping else {
        return out;
    };

    let targets: Vec<(&str, IntegrationFieldType)> = if schema.is_empty() {
        mapping
            .keys()
            .map(|handle| (handle.as_str(), IntegrationFieldType::String))
            .collect()
    } else {
        schema
            .iter()
            .map(|field| (field.handle.as_str(), field.field_type))
            .collect()
    };

    for (handle, field_type) in targets {
        let Some(expression) = mapping.get(handle).map(|s| s.trim()).filter(|s| !s.is_empty()) else {
            continue;
        };

        let (value, source) = resolve_expression(ctx, expression, field_type);

        let value = match (ctx.provider, source) {
            (Some(provider), Some(field)) => provider.modify_field_value(field, value),
            _ => value,
        };
        let value = ctx.hooks.modify_field_value(ctx, handle, source, value);

        if !overwrite_values && is_blank(&value) {
            continue;
        }
        out.insert(handle.to_string(), value);
    }

    out
}

/// Resolve one mapping expression. Returns the form field it referred to,
/// if any, so hooks can see where the value came from.
pub fn resolve_expression<'f>(
    ctx: &MappingContext<'f>,
    expression: &str,
    field_type: IntegrationFieldType,
) -> (Value, Option<&'f FormField>) {
    let target = NormalizeTarget::new(field_type, ctx.kind)
        .with_markup(ctx.accepts_markup)
        .with_relation_ids(ctx.relations_as_ids);

    if let Some(caps) = FIELD_REF_RE.captures(expression) {
        let handle = &caps[1];
        let Some(field) = ctx.form.field(handle) else {
            // Dangling reference, e.g. the field was deleted after mapping.
            return (Value::Null, None);
        };
        let raw = ctx.submission.value(handle).unwrap_or(&Value::Null);

        return match caps.get(2).map(|m| m.as_str()) {
            None => (field.value_for_integration(raw, &target), Some(field)),
            Some(inner) => match field.nested(inner) {
                Some(sub) => (nested_value(field, sub, raw, &target), Some(sub)),
                None => (Value::Null, None),
            },
        };
    }

    let rendered = template::render(
        expression,
        &TemplateContext {
            form: ctx.form,
            submission: ctx.submission,
            integration: Some(ctx.integration),
        },
    );
    if rendered.is_empty() {
        return (Value::Null, None);
    }
    (coerce::to_type(Value::String(rendered), field_type), None)
}

/// `{repeater[inner]}` collects the inner value of every row into a list;
/// `{group[inner]}` picks the single inner value.
fn nested_value(parent: &FormField, sub: &FormField, raw: &Value, target: &NormalizeTarget) -> Value {
    match &parent.kind {
        FieldKind::Repeater { .. } => {
            let rows = match raw {
                Value::Array(rows) => rows.as_slice(),
                _ => &[],
            };
            let item_target = NormalizeTarget::new(sub.kind.natural_type(), target.integration_kind)
                .with_markup(target.accepts_markup)
                .with_relation_ids(target.relations_as_ids);
            let values: Vec<Value> = rows
                .iter()
                .filter_map(|row| row.get(&sub.handle))
                .map(|cell| sub.value_for_integration(cell, &item_target))
                .filter(|v| !v.is_null())
                .collect();
            coerce::to_type(Value::Array(values), target.field_type)
        }
        _ => {
            let cell = raw.get(&sub.handle).unwrap_or(&Value::Null);
            sub.value_for_integration(cell, target)
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Check that every required slot has a mapping and every `{field}`
/// reference points at a field on the form.
pub fn validate_field_mapping(
    form: &Form,
    mapping: Option<&BTreeMap<String, String>>,
    schema: &[IntegrationField],
) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let empty = BTreeMap::new();
    let mapping = mapping.unwrap_or(&empty);

    for field in schema.iter().filter(|f| f.required) {
        let mapped = mapping
            .get(&field.handle)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !mapped {
            errors.push(format!("{} must be mapped.", field.name));
        }
    }

    for (handle, expression) in mapping {
        let Some(caps) = FIELD_REF_RE.captures(expression.trim()) else {
            continue;
        };
        let exists = match (form.field(&caps[1]), caps.get(2)) {
            (Some(field), Some(inner)) => field.nested(inner.as_str()).is_some(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !exists {
            errors.push(format!("{handle} is mapped to unknown field {expression}."));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
