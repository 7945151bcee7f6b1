//! Documents and their server-managed meta fields.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const CREATED_FIELD: &str = "_created";
pub const UPDATED_FIELD: &str = "_updated";
pub const ETAG_FIELD: &str = "_etag";

pub const META_FIELDS: &[&str] = &[ID_FIELD, CREATED_FIELD, UPDATED_FIELD, ETAG_FIELD];

pub fn is_meta_field(name: &str) -> bool {
    META_FIELDS.contains(&name)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn new_etag() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Canonical wire form for datetimes (RFC 3339, UTC, `Z`).
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

pub fn etag_of(doc: &Document) -> Option<&str> {
    doc.get(ETAG_FIELD).and_then(Value::as_str)
}

/// Copy of the document without meta fields.
pub fn strip_meta(doc: &Document) -> Document {
    doc.iter()
        .filter(|(k, _)| !is_meta_field(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Stamp a freshly validated document for insertion.
pub fn stamp_new(mut doc: Document, now: DateTime<Utc>) -> Document {
    let ts = Value::String(format_datetime(&now));
    doc.insert(ID_FIELD.into(), Value::String(new_id()));
    doc.insert(CREATED_FIELD.into(), ts.clone());
    doc.insert(UPDATED_FIELD.into(), ts);
    doc.insert(ETAG_FIELD.into(), Value::String(new_etag()));
    doc
}

/// Stamp a re-validated document that replaces `previous`; id and creation time carry over.
pub fn stamp_update(mut doc: Document, previous: &Document, now: DateTime<Utc>) -> Document {
    for key in [ID_FIELD, CREATED_FIELD] {
        if let Some(v) = previous.get(key) {
            doc.insert(key.into(), v.clone());
        }
    }
    doc.insert(UPDATED_FIELD.into(), Value::String(format_datetime(&now)));
    doc.insert(ETAG_FIELD.into(), Value::String(new_etag()));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn update_keeps_identity_and_refreshes_etag() {
        let now = Utc::now();
        let first = stamp_new(doc(json!({"username": "amy"})), now);
        let second = stamp_update(doc(json!({"username": "bea"})), &first, now);
        assert_eq!(id_of(&first), id_of(&second));
        assert_eq!(first.get(CREATED_FIELD), second.get(CREATED_FIELD));
        assert_ne!(etag_of(&first), etag_of(&second));
        assert_eq!(second["username"], "bea");
    }

    #[test]
    fn strip_meta_leaves_declared_fields() {
        let stamped = stamp_new(doc(json!({"username": "amy"})), Utc::now());
        assert_eq!(strip_meta(&stamped), doc(json!({"username": "amy"})));
    }
}
