//! Referential checks for relation fields and read-time embedding of referenced documents.

use crate::config::{ResourceSchema, SchemaRegistry};
use crate::document::Document;
use crate::error::{AppError, Violation, ViolationKind};
use crate::store::DocumentStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Relation fields whose referenced documents should replace the bare id in a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbedRequest {
    fields: Vec<String>,
}

impl EmbedRequest {
    pub fn none() -> Self {
        EmbedRequest::default()
    }

    /// Accepts only fields that are embeddable relations of `schema`.
    pub fn new<S: AsRef<str>>(schema: &ResourceSchema, fields: &[S]) -> Result<Self, AppError> {
        let mut out: Vec<String> = Vec::new();
        for name in fields {
            let name = name.as_ref();
            let embeddable = schema
                .field(name)
                .and_then(|f| f.relation())
                .map(|r| r.embeddable)
                .unwrap_or(false);
            if !embeddable {
                return Err(AppError::BadRequest(format!(
                    "field '{}' of '{}' is not embeddable",
                    name, schema.name
                )));
            }
            if !out.iter().any(|f| f == name) {
                out.push(name.to_string());
            }
        }
        Ok(EmbedRequest { fields: out })
    }

    /// Comma-separated list, e.g. `teacherID,studentID`.
    pub fn parse(schema: &ResourceSchema, raw: Option<&str>) -> Result<Self, AppError> {
        let fields: Vec<&str> = raw
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Self::new(schema, fields.as_slice())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Referenced documents keyed by the relation field that points at them.
pub type Embedded = HashMap<String, Document>;

/// Replace the ids of `embedded` fields with the fetched documents. Storage keeps ids only;
/// this shapes the response view.
pub fn project(doc: &Document, embedded: &Embedded) -> Document {
    let mut out = doc.clone();
    for (field, target) in embedded {
        if out.contains_key(field) {
            out.insert(field.clone(), Value::Object(target.clone()));
        }
    }
    out
}

#[derive(Clone)]
pub struct RelationResolver {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn DocumentStore>,
}

impl RelationResolver {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        RelationResolver { registry, store }
    }

    /// Write-time check: every relation id must name an existing document in its target resource.
    /// Returns the document with `embed` applied. All dangling fields are reported together.
    pub async fn resolve(
        &self,
        schema: &ResourceSchema,
        doc: &Document,
        embed: &EmbedRequest,
    ) -> Result<Document, AppError> {
        let mut dangling = Vec::new();
        let mut embedded = Embedded::new();
        for (field, relation) in schema.relation_fields() {
            let Some(id) = doc.get(&field.name).and_then(Value::as_str) else {
                continue;
            };
            let target = self.registry.lookup(&relation.resource)?;
            match self.store.find_by_id(&target.name, id).await? {
                Some(found) => {
                    if embed.contains(&field.name) {
                        embedded.insert(field.name.clone(), found);
                    }
                }
                None => {
                    tracing::debug!(
                        resource = %schema.name,
                        field = %field.name,
                        target = %relation.resource,
                        id,
                        "dangling reference"
                    );
                    dangling.push(Violation::new(
                        &field.name,
                        ViolationKind::DanglingReference {
                            resource: relation.resource.clone(),
                        },
                    ));
                }
            }
        }
        if !dangling.is_empty() {
            return Err(AppError::DanglingReference(dangling));
        }
        Ok(project(doc, &embedded))
    }

    /// Read-time embedding. A reference whose target has since been deleted keeps its bare id.
    pub async fn embed(
        &self,
        schema: &ResourceSchema,
        doc: &Document,
        embed: &EmbedRequest,
    ) -> Result<Document, AppError> {
        let mut cache = HashMap::new();
        self.embed_cached(schema, doc, embed, &mut cache).await
    }

    /// Embeds into many documents, fetching each referenced document once.
    pub async fn embed_all(
        &self,
        schema: &ResourceSchema,
        docs: Vec<Document>,
        embed: &EmbedRequest,
    ) -> Result<Vec<Document>, AppError> {
        if embed.is_empty() {
            return Ok(docs);
        }
        let mut cache = HashMap::new();
        let mut out = Vec::with_capacity(docs.len());
        for doc in &docs {
            out.push(self.embed_cached(schema, doc, embed, &mut cache).await?);
        }
        Ok(out)
    }

    async fn embed_cached(
        &self,
        schema: &ResourceSchema,
        doc: &Document,
        embed: &EmbedRequest,
        cache: &mut HashMap<(String, String), Option<Document>>,
    ) -> Result<Document, AppError> {
        let mut embedded = Embedded::new();
        for (field, relation) in schema.relation_fields() {
            if !embed.contains(&field.name) {
                continue;
            }
            let Some(id) = doc.get(&field.name).and_then(Value::as_str) else {
                continue;
            };
            let key = (relation.resource.clone(), id.to_string());
            let found = match cache.get(&key) {
                Some(hit) => hit.clone(),
                None => {
                    let fetched = self.store.find_by_id(&relation.resource, id).await?;
                    cache.insert(key, fetched.clone());
                    fetched
                }
            };
            if let Some(found) = found {
                embedded.insert(field.name.clone(), found);
            }
        }
        Ok(project(doc, &embedded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_domain, resolve};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    async fn fixture() -> (Arc<SchemaRegistry>, RelationResolver) {
        let registry = Arc::new(resolve(&parse_domain(include_str!("../../sample/domain.json")).unwrap()).unwrap());
        let store = Arc::new(MemoryStore::for_registry(&registry));
        store
            .insert("teachers", doc(json!({"_id": "t1", "username": "amy", "password": "x"})))
            .await
            .unwrap();
        store
            .insert("students", doc(json!({"_id": "s1", "username": "bob", "password": "y"})))
            .await
            .unwrap();
        let resolver = RelationResolver::new(registry.clone(), store);
        (registry, resolver)
    }

    #[tokio::test]
    async fn missing_target_is_dangling() {
        let (registry, resolver) = fixture().await;
        let courses = registry.lookup("courses").unwrap();
        let err = resolver
            .resolve(
                courses,
                &doc(json!({"teacherID": "t1", "studentID": "s-missing", "status": "created"})),
                &EmbedRequest::none(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.violations(),
            &[Violation::new(
                "studentID",
                ViolationKind::DanglingReference { resource: "students".into() }
            )]
        );
    }

    #[tokio::test]
    async fn ids_are_looked_up_in_their_own_resource() {
        let (registry, resolver) = fixture().await;
        let courses = registry.lookup("courses").unwrap();
        // s1 is a student, not a teacher
        let err = resolver
            .resolve(courses, &doc(json!({"teacherID": "s1", "studentID": "s1"})), &EmbedRequest::none())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DanglingReference(ref v) if v.len() == 1 && v[0].field == "teacherID"));
    }

    #[tokio::test]
    async fn embedding_replaces_ids_in_the_view_only() {
        let (registry, resolver) = fixture().await;
        let courses = registry.lookup("courses").unwrap();
        let stored = doc(json!({"teacherID": "t1", "studentID": "s1"}));
        let embed = EmbedRequest::parse(courses, Some("teacherID, studentID")).unwrap();
        let view = resolver.resolve(courses, &stored, &embed).await.unwrap();
        assert_eq!(view["teacherID"]["username"], "amy");
        assert_eq!(view["studentID"]["username"], "bob");
        assert_eq!(stored["teacherID"], "t1");

        let only_teacher = EmbedRequest::new(courses, &["teacherID"]).unwrap();
        let view = resolver.embed(courses, &stored, &only_teacher).await.unwrap();
        assert_eq!(view["teacherID"]["_id"], "t1");
        assert_eq!(view["studentID"], "s1");
    }

    #[tokio::test]
    async fn read_embedding_tolerates_deleted_targets() {
        let (registry, resolver) = fixture().await;
        let courses = registry.lookup("courses").unwrap();
        let stored = doc(json!({"teacherID": "t-gone", "studentID": "s1"}));
        let embed = EmbedRequest::new(courses, &["teacherID", "studentID"]).unwrap();
        let view = resolver.embed_all(courses, vec![stored], &embed).await.unwrap();
        assert_eq!(view[0]["teacherID"], "t-gone");
        assert_eq!(view[0]["studentID"]["_id"], "s1");
    }

    #[tokio::test]
    async fn only_embeddable_relations_can_be_requested() {
        let (registry, _) = fixture().await;
        let courses = registry.lookup("courses").unwrap();
        assert!(matches!(EmbedRequest::new(courses, &["status"]), Err(AppError::BadRequest(_))));
        assert!(matches!(EmbedRequest::parse(courses, Some("nope")), Err(AppError::BadRequest(_))));
        assert!(EmbedRequest::parse(courses, None).unwrap().is_empty());
        assert!(EmbedRequest::parse(courses, Some(" , ")).unwrap().is_empty());
    }
}
