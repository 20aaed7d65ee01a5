use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::integrations::field::IntegrationFieldType;

/// Coerce an already-normalized value into the shape an external slot of
/// `target` type expects. Never fails: unusable input becomes `null`, or an
/// empty list for array slots.
pub fn to_type(value: Value, target: IntegrationFieldType) -> Value {
    match target {
        IntegrationFieldType::Array => Value::Array(flatten(value)),
        IntegrationFieldType::String => to_string_value(value),
        IntegrationFieldType::Number => to_number(&value),
        IntegrationFieldType::Float => to_float(&value),
        IntegrationFieldType::Boolean => match &value {
            Value::Null => Value::Null,
            Value::String(s) if s.is_empty() => Value::Null,
            _ => Value::Bool(is_truthy(&value)),
        },
        IntegrationFieldType::Date => to_date(&value),
        IntegrationFieldType::Datetime => to_datetime(&value),
    }
}

pub fn flatten(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(_) => flatten(item),
                Value::Null => Vec::new(),
                other => vec![other],
            })
            .collect(),
        other => vec![other],
    }
}

/// Plain string form of a scalar, with lists joined by `, `.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_string).collect();
            Some(parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn to_string_value(value: Value) -> Value {
    match scalar_string(&value) {
        Some(s) => Value::String(s),
        None => Value::Null,
    }
}

fn numeric_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            (!cleaned.is_empty()).then_some(cleaned)
        }
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Array(items) if items.len() == 1 => numeric_text(&items[0]),
        _ => None,
    }
}

fn to_number(value: &Value) -> Value {
    let Some(text) = numeric_text(value) else {
        return Value::Null;
    };
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
        Ok(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

fn to_float(value: &Value) -> Value {
    numeric_text(value)
        .and_then(|text| text.parse::<f64>().ok())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

/// Parse the date and datetime shapes form fields produce.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn date_input(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map.get("date").and_then(|d| d.as_str()).map(|s| s.to_string()),
        Value::Array(items) if items.len() == 1 => date_input(&items[0]),
        _ => None,
    }
}

fn to_date(value: &Value) -> Value {
    date_input(value)
        .and_then(|s| parse_datetime(&s))
        .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn to_datetime(value: &Value) -> Value {
    date_input(value)
        .and_then(|s| parse_datetime(&s))
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .unwrap_or(Value::Null)
}
