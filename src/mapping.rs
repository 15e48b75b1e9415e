//! Declarative field tables for reference data, and the post payload mapping.
//!
//! Each [`RefKind`] has a fixed list of `(local column, remote key, column
//! type, optional coercion)` entries. The same table drives construction of
//! new rows ([`build`]), change detection on existing rows
//! ([`diff_and_apply`]), and the column list used by the repository.
//! Posts have a fixed column set and are mapped by [`post_fields`].

use serde_json::Value;
use std::collections::BTreeMap;

use crate::db::PostFields;
use crate::model::RefKind;
use crate::wp::model::{as_int, timestamp_field};

/// Local column name -> value, in the column's storage shape.
pub type Fields = BTreeMap<&'static str, Value>;

/// Pure, total conversion of a raw payload value.
pub type Coerce = fn(Option<&Value>) -> Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    /// Arbitrary structured data stored as JSON text.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub local: &'static str,
    pub remote: &'static str,
    pub column: ColumnType,
    pub coerce: Option<Coerce>,
}

impl FieldSpec {
    const fn text(local: &'static str, remote: &'static str) -> Self {
        Self {
            local,
            remote,
            column: ColumnType::Text,
            coerce: None,
        }
    }

    const fn int(local: &'static str, remote: &'static str) -> Self {
        Self {
            local,
            remote,
            column: ColumnType::Integer,
            coerce: None,
        }
    }

    const fn int_or_null(local: &'static str, remote: &'static str) -> Self {
        Self {
            local,
            remote,
            column: ColumnType::Integer,
            coerce: Some(int_or_null),
        }
    }

    const fn json(local: &'static str, remote: &'static str) -> Self {
        Self {
            local,
            remote,
            column: ColumnType::Json,
            coerce: None,
        }
    }

    /// The payload's value for this field, in the shape it is stored in.
    pub fn value_from(&self, payload: &Value) -> Value {
        let raw = payload.get(self.remote);
        match self.coerce {
            Some(coerce) => normalize(self.column, Some(&coerce(raw))),
            None => normalize(self.column, raw),
        }
    }
}

const CATEGORY_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("name", "name"),
    FieldSpec::text("slug", "slug"),
    FieldSpec::text("description", "description"),
    FieldSpec::int("post_count", "post_count"),
    FieldSpec::int("parent_wp_id", "parent"),
];

const TAG_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("name", "name"),
    FieldSpec::text("slug", "slug"),
    FieldSpec::text("description", "description"),
    FieldSpec::int("post_count", "post_count"),
];

const AUTHOR_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("login", "login"),
    FieldSpec::text("email", "email"),
    FieldSpec::text("name", "name"),
    FieldSpec::text("nice_name", "nice_name"),
    FieldSpec::text("url", "URL"),
    FieldSpec::text("avatar_url", "avatar_URL"),
    FieldSpec::text("profile_url", "profile_URL"),
];

const MEDIA_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("url", "URL"),
    FieldSpec::text("guid", "guid"),
    FieldSpec::text("uploaded_date", "date"),
    FieldSpec::int_or_null("post_wp_id", "post_ID"),
    FieldSpec::text("file_name", "file"),
    FieldSpec::text("file_extension", "extension"),
    FieldSpec::text("mime_type", "mime_type"),
    FieldSpec::int_or_null("width", "width"),
    FieldSpec::int_or_null("height", "height"),
    FieldSpec::text("title", "title"),
    FieldSpec::text("caption", "caption"),
    FieldSpec::text("description", "description"),
    FieldSpec::text("alt", "alt"),
    FieldSpec::json("exif", "exif"),
];

pub fn fields_for(kind: RefKind) -> &'static [FieldSpec] {
    match kind {
        RefKind::Category => CATEGORY_FIELDS,
        RefKind::Tag => TAG_FIELDS,
        RefKind::Author => AUTHOR_FIELDS,
        RefKind::Media => MEDIA_FIELDS,
    }
}

/// Field values for a new record of `kind`.
pub fn build(kind: RefKind, payload: &Value) -> Fields {
    fields_for(kind)
        .iter()
        .map(|spec| (spec.local, spec.value_from(payload)))
        .collect()
}

/// Copies every mapped field that differs from the payload into `existing`.
/// Returns true when anything changed and the record needs a write.
pub fn diff_and_apply(kind: RefKind, existing: &mut Fields, payload: &Value) -> bool {
    let mut changed = false;
    for spec in fields_for(kind) {
        let incoming = spec.value_from(payload);
        if existing.get(spec.local) != Some(&incoming) {
            existing.insert(spec.local, incoming);
            changed = true;
        }
    }
    changed
}

/// Integer or null. Zero, empty and non-numeric input all map to null.
pub fn int_or_null(value: Option<&Value>) -> Value {
    as_int(value)
        .filter(|n| *n != 0)
        .map(Value::from)
        .unwrap_or(Value::Null)
}

/// Scalar columns of a post payload. `author_id` is the local author row and
/// is resolved by the caller.
pub fn post_fields(payload: &Value, author_id: Option<i64>) -> PostFields {
    let text = |key: &str| match normalize(ColumnType::Text, payload.get(key)) {
        Value::String(s) => Some(s),
        _ => None,
    };
    let json = |key: &str| payload.get(key).cloned().unwrap_or(Value::Null);
    PostFields {
        author_id,
        post_date: timestamp_field(payload, "date"),
        modified: timestamp_field(payload, "modified"),
        title: text("title"),
        url: text("URL"),
        short_url: text("short_URL"),
        content: text("content"),
        excerpt: text("excerpt"),
        slug: text("slug"),
        guid: text("guid"),
        status: text("status"),
        sticky: flag(payload.get("sticky")).unwrap_or(false),
        password: text("password"),
        parent: json("parent"),
        post_type: text("type"),
        likes_enabled: flag(payload.get("likes_enabled")),
        sharing_enabled: flag(payload.get("sharing_enabled")),
        like_count: as_int(payload.get("like_count")),
        global_id: text("global_ID"),
        featured_image: text("featured_image"),
        format: text("format"),
        menu_order: as_int(payload.get("menu_order")),
        metadata: json("metadata"),
        post_thumbnail: json("post_thumbnail"),
    }
}

fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        other => as_int(Some(other)).map(|n| n != 0),
    }
}

/// Brings a raw value into the shape its column stores and reads back, so
/// that a stored value compares equal to the same payload fetched again.
fn normalize(column: ColumnType, value: Option<&Value>) -> Value {
    match (column, value) {
        (_, None) | (_, Some(Value::Null)) => Value::Null,
        (ColumnType::Text, Some(Value::String(s))) => Value::String(s.clone()),
        (ColumnType::Text, Some(Value::Bool(false))) => Value::Null,
        (ColumnType::Text, Some(other)) => Value::String(other.to_string()),
        (ColumnType::Integer, v) => as_int(v).map(Value::from).unwrap_or(Value::Null),
        (ColumnType::Json, Some(v)) => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn media_payload() -> Value {
        json!({
            "ID": 77,
            "URL": "https://test.local/testpost.jpg",
            "guid": "https://test.local/testpost.jpg",
            "date": "2015-04-01T12:00:00+00:00",
            "post_ID": 10,
            "file": "testpost.jpg",
            "extension": "jpg",
            "mime_type": "image/jpeg",
            "width": "640",
            "height": 480,
            "title": "Test",
            "caption": "",
            "description": "",
            "alt": "",
            "exif": {"camera": "X100", "iso": "200"}
        })
    }

    #[test]
    fn int_or_null_is_total() {
        assert_eq!(int_or_null(Some(&json!(5))), json!(5));
        assert_eq!(int_or_null(Some(&json!("42"))), json!(42));
        assert_eq!(int_or_null(Some(&json!("wide"))), Value::Null);
        assert_eq!(int_or_null(Some(&json!(""))), Value::Null);
        assert_eq!(int_or_null(Some(&json!(0))), Value::Null);
        assert_eq!(int_or_null(Some(&json!({"a": 1}))), Value::Null);
        assert_eq!(int_or_null(None), Value::Null);
    }

    #[test]
    fn build_maps_every_field() {
        let fields = build(RefKind::Media, &media_payload());
        assert_eq!(fields.len(), MEDIA_FIELDS.len());
        assert_eq!(fields["url"], json!("https://test.local/testpost.jpg"));
        assert_eq!(fields["post_wp_id"], json!(10));
        assert_eq!(fields["width"], json!(640));
        assert_eq!(fields["exif"]["camera"], json!("X100"));
    }

    #[test]
    fn build_tolerates_missing_and_malformed_values() {
        let fields = build(RefKind::Media, &json!({"ID": 1, "width": "n/a", "post_ID": false}));
        assert_eq!(fields["width"], Value::Null);
        assert_eq!(fields["post_wp_id"], Value::Null);
        assert_eq!(fields["url"], Value::Null);
    }

    #[test]
    fn author_fields_use_remote_casing() {
        let fields = build(
            RefKind::Author,
            &json!({"ID": 3, "login": "jdoe", "URL": "https://jdoe.blog", "avatar_URL": "a", "profile_URL": "p"}),
        );
        assert_eq!(fields["url"], json!("https://jdoe.blog"));
        assert_eq!(fields["avatar_url"], json!("a"));
        assert_eq!(fields["profile_url"], json!("p"));
        assert_eq!(fields["email"], Value::Null);
    }

    #[test]
    fn diff_and_apply_is_a_no_op_for_identical_payloads() {
        let payload = media_payload();
        let mut existing = build(RefKind::Media, &payload);
        assert!(!diff_and_apply(RefKind::Media, &mut existing, &payload));
    }

    #[test]
    fn diff_and_apply_copies_changed_fields() {
        let payload = json!({"ID": 5, "name": "News", "slug": "news", "description": "", "post_count": 3, "parent": 0});
        let mut existing = build(RefKind::Category, &payload);

        let mut changed = payload.clone();
        changed["post_count"] = json!(4);
        changed["name"] = json!("Breaking News");
        assert!(diff_and_apply(RefKind::Category, &mut existing, &changed));
        assert_eq!(existing["post_count"], json!(4));
        assert_eq!(existing["name"], json!("Breaking News"));
        assert_eq!(existing["slug"], json!("news"));
    }

    #[test]
    fn post_fields_reads_loose_payloads() {
        let payload = json!({
            "ID": 10,
            "date": "2024-03-01T10:00:00+00:00",
            "modified": "2024-03-02T10:00:00-02:00",
            "title": "Hello",
            "URL": "https://x/hello",
            "status": "publish",
            "sticky": 1,
            "parent": false,
            "type": "post",
            "likes_enabled": true,
            "like_count": "7",
            "global_ID": "abc",
            "featured_image": "",
            "menu_order": 0,
            "metadata": false,
            "post_thumbnail": null
        });
        let fields = post_fields(&payload, Some(4));
        assert_eq!(fields.author_id, Some(4));
        assert_eq!(fields.modified.unwrap().to_rfc3339(), "2024-03-02T12:00:00+00:00");
        assert_eq!(fields.title.as_deref(), Some("Hello"));
        assert!(fields.sticky);
        assert_eq!(fields.parent, json!(false));
        assert_eq!(fields.post_type.as_deref(), Some("post"));
        assert_eq!(fields.likes_enabled, Some(true));
        assert_eq!(fields.sharing_enabled, None);
        assert_eq!(fields.like_count, Some(7));
        assert_eq!(fields.featured_image.as_deref(), Some(""));
        assert_eq!(fields.post_thumbnail, Value::Null);
        assert_eq!(fields.content, None);
    }

    #[test]
    fn numeric_text_fields_compare_stably() {
        let payload = json!({"ID": 5, "name": 2024, "slug": "2024"});
        let mut existing = build(RefKind::Tag, &payload);
        assert_eq!(existing["name"], json!("2024"));
        assert!(!diff_and_apply(RefKind::Tag, &mut existing, &payload));
    }
}
