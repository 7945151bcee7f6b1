//! Document validation against a resource schema.

use crate::config::{FieldKind, FieldSpec, ResourceSchema};
use crate::document::{format_datetime, id_of, Document};
use crate::error::{AppError, Violation, ViolationKind};
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of validating one submission.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationResult {
    /// Declared fields only, values in canonical form.
    Accepted(Document),
    /// Every problem found, in schema field order, undeclared fields last.
    Rejected(Vec<Violation>),
}

impl ValidationResult {
    pub fn into_result(self) -> Result<Document, AppError> {
        match self {
            ValidationResult::Accepted(doc) => Ok(doc),
            ValidationResult::Rejected(v) => Err(AppError::Validation(v)),
        }
    }
}

/// Runs the per-field checks, then the uniqueness check against the store.
#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn DocumentStore>,
}

impl Validator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Validator { store }
    }

    /// `current_id` is the stored document being replaced, which may keep its own unique values.
    /// Store failures are returned as errors, never as violations.
    pub async fn validate(
        &self,
        schema: &ResourceSchema,
        candidate: &Document,
        current_id: Option<&str>,
    ) -> Result<ValidationResult, AppError> {
        let (normalized, mut violations) = check_document(schema, candidate);

        for field in schema.unique_fields() {
            if violations.iter().any(|v| v.field == field.name) {
                continue;
            }
            let Some(value) = normalized.get(&field.name) else {
                continue;
            };
            let existing = self.store.find_by_field(&schema.name, &field.name, value).await?;
            if let Some(existing) = existing {
                if current_id.is_none() || id_of(&existing) != current_id {
                    violations.push(Violation::new(&field.name, ViolationKind::DuplicateValue));
                }
            }
        }

        if violations.is_empty() {
            Ok(ValidationResult::Accepted(normalized))
        } else {
            sort_by_declaration(schema, &mut violations);
            tracing::debug!(resource = %schema.name, count = violations.len(), "document rejected");
            Ok(ValidationResult::Rejected(violations))
        }
    }
}

fn sort_by_declaration(schema: &ResourceSchema, violations: &mut [Violation]) {
    violations.sort_by_key(|v| {
        schema
            .fields
            .iter()
            .position(|f| f.name == v.field)
            .unwrap_or(usize::MAX)
    });
}

/// Checks that need no store access: presence, type, length, enumeration and undeclared fields.
/// Every problem is collected; nothing short-circuits across fields.
pub fn check_document(schema: &ResourceSchema, candidate: &Document) -> (Document, Vec<Violation>) {
    let mut normalized = Document::new();
    let mut violations = Vec::new();

    for field in &schema.fields {
        match candidate.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    violations.push(Violation::new(&field.name, ViolationKind::MissingRequiredField));
                }
            }
            Some(value) => match coerce_value(&field.kind, value) {
                Some(v) => {
                    if let Some(kind) = check_constraints(field, &v) {
                        violations.push(Violation::new(&field.name, kind));
                    }
                    normalized.insert(field.name.clone(), v);
                }
                None => violations.push(Violation::new(
                    &field.name,
                    ViolationKind::TypeMismatch {
                        expected: field.kind.type_name(),
                    },
                )),
            },
        }
    }

    for key in candidate.keys() {
        if schema.field(key).is_none() {
            violations.push(Violation::new(key, ViolationKind::UnknownField));
        }
    }
    (normalized, violations)
}

fn check_constraints(field: &FieldSpec, v: &Value) -> Option<ViolationKind> {
    match &field.kind {
        FieldKind::String {
            min_length,
            max_length,
            allowed,
        } => {
            let s = v.as_str()?;
            let len = s.chars().count();
            let too_short = min_length.map(|m| len < m).unwrap_or(false);
            let too_long = max_length.map(|m| len > m).unwrap_or(false);
            if too_short || too_long {
                return Some(ViolationKind::LengthOutOfRange {
                    min: *min_length,
                    max: *max_length,
                    actual: len,
                });
            }
            match allowed {
                Some(allowed) if !allowed.iter().any(|a| a == s) => Some(ViolationKind::NotAllowed),
                _ => None,
            }
        }
        FieldKind::Integer { allowed: Some(allowed) } => {
            let n = v.as_i64()?;
            (!allowed.contains(&n)).then_some(ViolationKind::NotAllowed)
        }
        _ => None,
    }
}

/// Coerce a submitted value to the canonical form of `kind`; `None` when it does not conform.
pub fn coerce_value(kind: &FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::String { .. } => value.as_str().map(|s| Value::String(s.to_string())),
        FieldKind::Integer { .. } => match value {
            Value::Number(n) => n.as_i64().map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldKind::Datetime => value
            .as_str()
            .and_then(parse_datetime)
            .map(|dt| Value::String(format_datetime(&dt))),
        FieldKind::ObjectId { .. } => value
            .as_str()
            .filter(|s| !s.is_empty() && !s.chars().any(char::is_whitespace))
            .map(|s| Value::String(s.to_string())),
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
    }
}

/// RFC 3339 or RFC 2822 (HTTP-style) timestamps.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_domain, resolve, SchemaRegistry};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        resolve(&parse_domain(include_str!("../../sample/domain.json")).unwrap()).unwrap()
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn kinds(violations: &[Violation]) -> Vec<(&str, &ViolationKind)> {
        violations.iter().map(|v| (v.field.as_str(), &v.kind)).collect()
    }

    #[test]
    fn missing_required_field_is_reported_alone() {
        let reg = registry();
        let teachers = reg.lookup("teachers").unwrap();
        let (_, violations) = check_document(teachers, &doc(json!({"username": "amy", "nickname": "a"})));
        assert_eq!(kinds(&violations), vec![("password", &ViolationKind::MissingRequiredField)]);

        let (_, violations) = check_document(teachers, &doc(json!({"username": "amy", "password": null})));
        assert_eq!(kinds(&violations), vec![("password", &ViolationKind::MissingRequiredField)]);
    }

    #[test]
    fn nickname_length_bounds() {
        let reg = registry();
        let teachers = reg.lookup("teachers").unwrap();
        for ok in ["a", "abcdefghij"] {
            let (_, v) = check_document(teachers, &doc(json!({"username": "amy", "password": "x", "nickname": ok})));
            assert!(v.is_empty(), "{} rejected: {:?}", ok, v);
        }
        let (_, v) = check_document(
            teachers,
            &doc(json!({"username": "amy", "password": "x", "nickname": "abcdefghijk"})),
        );
        assert_eq!(
            kinds(&v),
            vec![(
                "nickname",
                &ViolationKind::LengthOutOfRange { min: None, max: Some(10), actual: 11 }
            )]
        );
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let reg = registry();
        let teachers = reg.lookup("teachers").unwrap();
        let (_, v) = check_document(
            teachers,
            &doc(json!({"username": "amy", "password": "x", "nickname": "éééééééééé"})),
        );
        assert!(v.is_empty());
    }

    #[test]
    fn violations_accumulate_across_fields() {
        let reg = registry();
        let courses = reg.lookup("courses").unwrap();
        let (_, v) = check_document(
            courses,
            &doc(json!({
                "teacherID": 42,
                "startTime": "yesterday",
                "duration": "long",
                "status": "lost",
                "room": "B1"
            })),
        );
        assert_eq!(
            kinds(&v),
            vec![
                ("teacherID", &ViolationKind::TypeMismatch { expected: "objectid" }),
                ("studentID", &ViolationKind::MissingRequiredField),
                ("startTime", &ViolationKind::TypeMismatch { expected: "datetime" }),
                ("duration", &ViolationKind::TypeMismatch { expected: "integer" }),
                ("status", &ViolationKind::NotAllowed),
                ("room", &ViolationKind::UnknownField),
            ]
        );
    }

    #[test]
    fn every_listed_status_is_allowed() {
        let reg = registry();
        let courses = reg.lookup("courses").unwrap();
        for status in [
            "created", "qqcontact", "prepared", "telcontact", "preHostVisit", "started", "completed",
            "sendReport", "closed",
        ] {
            let (_, v) = check_document(
                courses,
                &doc(json!({"teacherID": "t1", "studentID": "s1", "status": status})),
            );
            assert!(v.is_empty(), "{} rejected", status);
        }
        for status in ["Created", "cancelled", ""] {
            let (_, v) = check_document(
                courses,
                &doc(json!({"teacherID": "t1", "studentID": "s1", "status": status})),
            );
            assert_eq!(kinds(&v), vec![("status", &ViolationKind::NotAllowed)]);
        }
    }

    #[test]
    fn values_are_normalized() {
        let reg = registry();
        let courses = reg.lookup("courses").unwrap();
        let (normalized, v) = check_document(
            courses,
            &doc(json!({
                "teacherID": "t1",
                "studentID": "s1",
                "startTime": "Tue, 02 Apr 2013 10:29:13 GMT",
                "duration": "90"
            })),
        );
        assert!(v.is_empty());
        assert_eq!(normalized["startTime"], "2013-04-02T10:29:13Z");
        assert_eq!(normalized["duration"], 90);

        let (again, v) = check_document(courses, &normalized);
        assert!(v.is_empty());
        assert_eq!(again, normalized);
    }

    #[test]
    fn meta_fields_are_not_accepted_from_clients() {
        let reg = registry();
        let teachers = reg.lookup("teachers").unwrap();
        let (_, v) = check_document(teachers, &doc(json!({"_id": "x", "username": "amy", "password": "x"})));
        assert_eq!(kinds(&v), vec![("_id", &ViolationKind::UnknownField)]);
    }

    #[test]
    fn coercion_per_kind() {
        let int = FieldKind::Integer { allowed: None };
        assert_eq!(coerce_value(&int, &json!(3)), Some(json!(3)));
        assert_eq!(coerce_value(&int, &json!(3.5)), None);
        assert_eq!(coerce_value(&FieldKind::Boolean, &json!("TRUE")), Some(json!(true)));
        assert_eq!(coerce_value(&FieldKind::Boolean, &json!(1)), None);
        let oid = FieldKind::ObjectId { relation: None };
        assert_eq!(coerce_value(&oid, &json!("")), None);
        assert_eq!(coerce_value(&oid, &json!("a b")), None);
        assert_eq!(
            coerce_value(&FieldKind::Datetime, &json!("2024-05-01T12:00:00+02:00")),
            Some(json!("2024-05-01T10:00:00Z"))
        );
    }

    #[tokio::test]
    async fn duplicate_unique_value_is_rejected() {
        let reg = registry();
        let store = Arc::new(MemoryStore::for_registry(&reg));
        store
            .insert("teachers", doc(json!({"_id": "t1", "username": "amy", "password": "x"})))
            .await
            .unwrap();
        let validator = Validator::new(store);
        let teachers = reg.lookup("teachers").unwrap();

        let result = validator
            .validate(teachers, &doc(json!({"username": "amy", "password": "y"})), None)
            .await
            .unwrap();
        assert_eq!(
            result,
            ValidationResult::Rejected(vec![Violation::new("username", ViolationKind::DuplicateValue)])
        );

        // the owner of the value may keep it
        let result = validator
            .validate(teachers, &doc(json!({"username": "amy", "password": "y"})), Some("t1"))
            .await
            .unwrap();
        assert!(matches!(result, ValidationResult::Accepted(_)));
    }

    #[tokio::test]
    async fn revalidating_accepted_document_is_idempotent() {
        let reg = registry();
        let validator = Validator::new(Arc::new(MemoryStore::for_registry(&reg)));
        let courses = reg.lookup("courses").unwrap();
        let input = doc(json!({
            "teacherID": "t1",
            "studentID": "s1",
            "startTime": "2024-01-01T08:00:00.250+00:00",
            "duration": 45,
            "status": "prepared"
        }));
        let first = validator.validate(courses, &input, None).await.unwrap();
        let ValidationResult::Accepted(normalized) = first.clone() else {
            panic!("rejected: {:?}", first);
        };
        let second = validator.validate(courses, &normalized, None).await.unwrap();
        assert_eq!(first, second);
    }
}
