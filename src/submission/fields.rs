use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::fields::FormField;
use crate::models::Form;

/// Field errors keyed by handle, serialized as `{"errors": {handle: [msg]}}`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Keep only values for fields the form defines. Anything else (captcha
/// tokens, CSRF fields) stays in the raw request only.
pub fn known_values(form: &Form, raw: &Value) -> Value {
    let Some(obj) = raw.as_object() else {
        return Value::Object(Map::new());
    };

    let values: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| form.field(key).is_some())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Value::Object(values)
}

/// Required fields must carry something. Payment fields are checked by
/// their gateway instead.
pub fn validate_required(form: &Form, values: &Value) -> FieldErrors {
    let mut errors = FieldErrors::new();

    for field in form.fields.iter().filter(|f| f.required && !f.kind.is_payment()) {
        if is_blank(values.get(&field.handle)) {
            errors
                .entry(field.handle.clone())
                .or_default()
                .push(format!("{} cannot be blank.", display_name(field)));
        }
    }

    errors
}

fn display_name(field: &FormField) -> &str {
    if field.label.is_empty() { &field.handle } else { &field.label }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.iter().all(|v| is_blank(Some(v))),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}
