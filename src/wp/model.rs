//! Accessors over raw API payloads. The API is loosely typed (numbers as
//! strings, `false` for absent objects), so every accessor is total and
//! returns `None` instead of failing.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Remote identifier stored under `ID`. Zero, missing and non-numeric values
/// all mean "no object".
pub fn remote_id(obj: &Value) -> Option<i64> {
    as_int(obj.get("ID")).filter(|id| *id != 0)
}

/// Integer view of a JSON value: numbers, and strings holding an integer.
pub fn as_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Items of a listing page, e.g. `body["posts"]`. Anything but an array is
/// treated as no items.
pub fn list_items<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Members of a relation embedded in a post. The API keys categories and tags
/// by name and attachments by id; arrays are accepted too.
pub fn relation_members<'a>(post: &'a Value, key: &str) -> Vec<&'a Value> {
    match post.get(key) {
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

/// Continuation token from `meta.next_page`.
pub fn next_page_handle(body: &Value) -> Option<String> {
    match body.get("meta")?.get("next_page")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM:SS` read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn timestamp_field(obj: &Value, key: &str) -> Option<DateTime<Utc>> {
    obj.get(key).and_then(Value::as_str).and_then(parse_timestamp)
}

/// Remote id of a post's parent. The API sends `false` for top-level posts and
/// an object with an `ID` otherwise.
pub fn parent_id(post: &Value) -> Option<i64> {
    post.get("parent").and_then(remote_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_id_accepts_numbers_and_numeric_strings() {
        assert_eq!(remote_id(&json!({"ID": 12})), Some(12));
        assert_eq!(remote_id(&json!({"ID": "34"})), Some(34));
        assert_eq!(remote_id(&json!({"ID": 0})), None);
        assert_eq!(remote_id(&json!({"ID": "abc"})), None);
        assert_eq!(remote_id(&json!({})), None);
        assert_eq!(remote_id(&json!(false)), None);
    }

    #[test]
    fn relation_members_reads_objects_and_arrays() {
        let post = json!({
            "tags": {"News": {"ID": 1}, "Sports": {"ID": 2}},
            "attachments": [{"ID": 9}],
            "categories": false
        });
        assert_eq!(relation_members(&post, "tags").len(), 2);
        assert_eq!(relation_members(&post, "attachments").len(), 1);
        assert!(relation_members(&post, "categories").is_empty());
        assert!(relation_members(&post, "missing").is_empty());
    }

    #[test]
    fn next_page_handle_reads_meta() {
        assert_eq!(
            next_page_handle(&json!({"meta": {"next_page": "value=abc&id=9"}})),
            Some("value=abc&id=9".to_string())
        );
        assert_eq!(next_page_handle(&json!({"meta": {"next_page": ""}})), None);
        assert_eq!(next_page_handle(&json!({"meta": {}})), None);
        assert_eq!(next_page_handle(&json!({})), None);
    }

    #[test]
    fn parse_timestamp_normalizes_to_utc() {
        let ts = parse_timestamp("2015-04-01T12:00:00-04:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2015-04-01T16:00:00+00:00");
        let naive = parse_timestamp("2015-04-01T12:00:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2015-04-01T12:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn parent_id_handles_false() {
        assert_eq!(parent_id(&json!({"parent": false})), None);
        assert_eq!(parent_id(&json!({"parent": {"ID": 100, "type": "post"}})), Some(100));
    }
}
