//! In-process document store. Insertion order is list order.

use super::{matches_filter, DocumentStore, Filter, Page};
use crate::config::SchemaRegistry;
use crate::document::{etag_of, id_of, Document, ID_FIELD};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    /// Unique field names per resource; checked under the write lock at commit.
    unique: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Store honouring every `unique` flag declared in the registry.
    pub fn for_registry(registry: &SchemaRegistry) -> Self {
        let unique = registry
            .schemas()
            .map(|s| {
                (
                    s.name.clone(),
                    s.unique_fields().map(|f| f.name.clone()).collect::<Vec<_>>(),
                )
            })
            .collect();
        MemoryStore {
            collections: RwLock::new(HashMap::new()),
            unique,
        }
    }

    fn conflicting_field(&self, resource: &str, docs: &[Document], doc: &Document, skip_id: Option<&str>) -> Option<String> {
        let fields = self.unique.get(resource)?;
        fields
            .iter()
            .find(|field| {
                let Some(value) = doc.get(field.as_str()).filter(|v| !v.is_null()) else {
                    return false;
                };
                docs.iter()
                    .filter(|d| skip_id.is_none() || id_of(d) != skip_id)
                    .any(|d| d.get(field.as_str()) == Some(value))
            })
            .cloned()
    }
}

fn check_etag(stored: &Document, id: &str, expected: Option<&str>) -> Result<(), StoreError> {
    match expected {
        Some(e) if etag_of(stored) != Some(e) => Err(StoreError::EtagMismatch { id: id.to_string() }),
        _ => Ok(()),
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(resource)
            .and_then(|docs| docs.iter().find(|d| id_of(d) == Some(id)))
            .cloned())
    }

    async fn find_by_field(
        &self,
        resource: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(resource)
            .and_then(|docs| docs.iter().find(|d| d.get(field) == Some(value)))
            .cloned())
    }

    async fn find_all(&self, resource: &str, filter: &Filter, page: Page) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(resource)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, filter))
                    .skip(page.offset as usize)
                    .take(page.limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, resource: &str, doc: Document) -> Result<Document, StoreError> {
        let id = id_of(&doc)
            .ok_or_else(|| StoreError::Backend(format!("document without {}", ID_FIELD)))?
            .to_string();
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        let docs = guard.entry(resource.to_string()).or_default();
        if docs.iter().any(|d| id_of(d) == Some(id.as_str())) {
            return Err(StoreError::Duplicate { field: ID_FIELD.into() });
        }
        if let Some(field) = self.conflicting_field(resource, docs, &doc, None) {
            return Err(StoreError::Duplicate { field });
        }
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn replace(
        &self,
        resource: &str,
        id: &str,
        doc: Document,
        expected_etag: Option<&str>,
    ) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = guard.get_mut(resource) else {
            return Ok(None);
        };
        let Some(pos) = docs.iter().position(|d| id_of(d) == Some(id)) else {
            return Ok(None);
        };
        check_etag(&docs[pos], id, expected_etag)?;
        if let Some(field) = self.conflicting_field(resource, docs, &doc, Some(id)) {
            return Err(StoreError::Duplicate { field });
        }
        docs[pos] = doc.clone();
        Ok(Some(doc))
    }

    async fn delete(&self, resource: &str, id: &str, expected_etag: Option<&str>) -> Result<bool, StoreError> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = guard.get_mut(resource) else {
            return Ok(false);
        };
        let Some(pos) = docs.iter().position(|d| id_of(d) == Some(id)) else {
            return Ok(false);
        };
        check_etag(&docs[pos], id, expected_etag)?;
        docs.remove(pos);
        Ok(true)
    }

    async fn delete_all(&self, resource: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        let Some(docs) = guard.get_mut(resource) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !matches_filter(d, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.collections.read().map(|_| ()).map_err(|_| poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_domain, resolve};
    use serde_json::json;

    fn store() -> MemoryStore {
        let registry = resolve(&parse_domain(include_str!("../../sample/domain.json")).unwrap()).unwrap();
        MemoryStore::for_registry(&registry)
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unique_field_is_enforced_at_commit() {
        let store = store();
        store
            .insert("teachers", doc(json!({"_id": "t1", "username": "amy", "password": "x"})))
            .await
            .unwrap();
        let err = store
            .insert("teachers", doc(json!({"_id": "t2", "username": "amy", "password": "y"})))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate { field: "username".into() });
        // same username in another resource is fine
        store
            .insert("students", doc(json!({"_id": "s1", "username": "amy", "password": "z"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn replace_may_keep_its_own_unique_value() {
        let store = store();
        store
            .insert("teachers", doc(json!({"_id": "t1", "username": "amy", "password": "x"})))
            .await
            .unwrap();
        store
            .insert("teachers", doc(json!({"_id": "t2", "username": "bea", "password": "x"})))
            .await
            .unwrap();
        let kept = store
            .replace("teachers", "t1", doc(json!({"_id": "t1", "username": "amy", "password": "new"})), None)
            .await
            .unwrap();
        assert!(kept.is_some());
        let err = store
            .replace("teachers", "t2", doc(json!({"_id": "t2", "username": "amy", "password": "x"})), None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate { field: "username".into() });
        assert_eq!(store.replace("teachers", "nope", Document::new(), None).await, Ok(None));
    }

    #[tokio::test]
    async fn filter_and_page() {
        let store = MemoryStore::new();
        for (i, status) in ["created", "closed", "created", "created"].iter().enumerate() {
            store
                .insert("courses", doc(json!({"_id": format!("c{}", i), "status": status})))
                .await
                .unwrap();
        }
        let filter = vec![("status".to_string(), json!("created"))];
        let all = store.find_all("courses", &filter, Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        let page = store
            .find_all("courses", &filter, Page::new(Some(1), Some(1)))
            .await
            .unwrap();
        assert_eq!(id_of(&page[0]), Some("c2"));
        assert_eq!(store.delete_all("courses", &filter).await, Ok(3));
        assert_eq!(store.find_all("courses", &Vec::new(), Page::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_collection_reads_empty() {
        let store = MemoryStore::new();
        assert!(store.find_all("ghosts", &Vec::new(), Page::default()).await.unwrap().is_empty());
        assert_eq!(store.find_by_id("ghosts", "x").await, Ok(None));
        assert_eq!(store.delete("ghosts", "x", None).await, Ok(false));
    }

    #[tokio::test]
    async fn stale_etag_writes_nothing() {
        let store = store();
        store
            .insert("teachers", doc(json!({"_id": "t1", "_etag": "e1", "username": "amy", "password": "x"})))
            .await
            .unwrap();
        let next = doc(json!({"_id": "t1", "_etag": "e2", "username": "amy", "password": "y"}));
        assert_eq!(
            store.replace("teachers", "t1", next.clone(), Some("e0")).await,
            Err(StoreError::EtagMismatch { id: "t1".into() })
        );
        assert_eq!(
            store.delete("teachers", "t1", Some("e0")).await,
            Err(StoreError::EtagMismatch { id: "t1".into() })
        );
        assert!(store.replace("teachers", "t1", next, Some("e1")).await.unwrap().is_some());
        // the first writer's etag is now stale too
        assert!(store.replace("teachers", "t1", Document::new(), Some("e1")).await.is_err());
        assert_eq!(store.delete("teachers", "t1", Some("e2")).await, Ok(true));
        assert_eq!(store.find_by_id("teachers", "t1").await, Ok(None));
    }
}
