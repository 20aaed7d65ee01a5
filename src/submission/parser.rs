use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// Parse a request body based on Content-Type header. Multipart bodies go
/// through [`parse_multipart`] instead.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, String> {
    let ct = content_type.unwrap_or("application/json");

    let values = if ct.contains("application/json") {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {e}"))?
    } else if ct.contains("application/x-www-form-urlencoded") {
        parse_form_urlencoded(body)?
    } else if ct.contains("multipart/form-data") {
        return Err("multipart".to_string());
    } else {
        // Try JSON first, then form-urlencoded
        serde_json::from_slice(body)
            .or_else(|_| parse_form_urlencoded(body))
            .map_err(|e| format!("Unable to parse body: {e}"))?
    };

    match values {
        Value::Object(map) => Ok(unwrap_fields(map)),
        _ => Err("Submission body must be an object".to_string()),
    }
}

fn parse_form_urlencoded(body: &[u8]) -> Result<Value, String> {
    let body_str = std::str::from_utf8(body).map_err(|e| format!("Invalid UTF-8: {e}"))?;

    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(body_str.as_bytes()) {
        insert_pair(&mut map, &key, Value::String(value.into_owned()));
    }
    Ok(Value::Object(map))
}

/// Parse multipart form data using multer. File parts are recorded by name,
/// type and size; their content is not kept.
pub async fn parse_multipart(headers: &HeaderMap, body: bytes::Bytes) -> Result<Value, String> {
    let boundary = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| "Missing multipart boundary".to_string())?;

    let stream = futures_util::stream::once(async { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut map = Map::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Multipart error: {e}"))?
    {
        let name = field.name().unwrap_or("unknown").to_string();

        let value = match field.file_name().map(|s| s.to_string()) {
            Some(filename) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Field read error: {e}"))?;
                serde_json::json!({
                    "filename": filename,
                    "content_type": content_type,
                    "size": data.len(),
                })
            }
            None => Value::String(
                field
                    .text()
                    .await
                    .map_err(|e| format!("Field read error: {e}"))?,
            ),
        };

        insert_pair(&mut map, &name, value);
    }

    Ok(unwrap_fields(map))
}

/// `name[]` and repeated names collect into arrays; `group[inner]` nests.
fn insert_pair(map: &mut Map<String, Value>, name: &str, value: Value) {
    let path = segments(name);
    insert_path(map, &path, value);
}

/// `a[b][]` → `["a", "b", ""]`.
fn segments(name: &str) -> Vec<&str> {
    let Some((head, rest)) = name.split_once('[') else {
        return vec![name];
    };
    let Some(rest) = rest.strip_suffix(']') else {
        return vec![name];
    };
    let mut path = vec![head];
    path.extend(rest.split("]["));
    path
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };

    match rest {
        [] => append(map, key, value, false),
        [""] => append(map, key, value, true),
        _ => {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}

fn append(map: &mut Map<String, Value>, key: &str, value: Value, as_list: bool) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if as_list => {
            map.insert(key.to_string(), Value::Array(vec![value]));
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

/// Front-end forms post values as `fields[handle]`. Lift them to the top
/// level so captcha tokens and field values sit side by side.
fn unwrap_fields(mut map: Map<String, Value>) -> Value {
    if let Some(Value::Object(fields)) = map.remove("fields") {
        for (key, value) in fields {
            map.entry(key).or_insert(value);
        }
    }
    Value::Object(map)
}
