//! Storage collaborator: resource-scoped document store interface and implementations.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_collections, ensure_database_exists, PgDocumentStore};

use crate::document::Document;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Exact-match conditions, all of which must hold.
pub type Filter = Vec<(String, Value)>;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Limit defaults to 100 and is capped at 1000; offset defaults to 0.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Page {
            limit: limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

pub fn matches_filter(doc: &Document, filter: &[(String, Value)]) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

/// Source of truth for documents. Every call names the resource it operates on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// First document whose `field` equals `value`.
    async fn find_by_field(
        &self,
        resource: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StoreError>;

    async fn find_all(&self, resource: &str, filter: &Filter, page: Page) -> Result<Vec<Document>, StoreError>;

    /// Insert a document that already carries its `_id`. Unique fields are enforced at commit.
    async fn insert(&self, resource: &str, doc: Document) -> Result<Document, StoreError>;

    /// Replace the document with `id`; `None` when it no longer exists. With `expected_etag`,
    /// the stored `_etag` is compared in the same commit and a mismatch is `EtagMismatch`.
    async fn replace(
        &self,
        resource: &str,
        id: &str,
        doc: Document,
        expected_etag: Option<&str>,
    ) -> Result<Option<Document>, StoreError>;

    /// Returns false when nothing was removed. `expected_etag` as for `replace`.
    async fn delete(&self, resource: &str, id: &str, expected_etag: Option<&str>) -> Result<bool, StoreError>;

    async fn delete_all(&self, resource: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Applies one deadline to every call of the wrapped store.
pub struct TimeoutStore {
    inner: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        TimeoutStore { inner, timeout }
    }

    async fn run<T>(
        &self,
        op: &'static str,
        resource: &str,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(op, resource, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(StoreError::Unavailable(format!("{} on '{}' timed out", op, resource)))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for TimeoutStore {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.run("find_by_id", resource, self.inner.find_by_id(resource, id)).await
    }

    async fn find_by_field(
        &self,
        resource: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StoreError> {
        self.run("find_by_field", resource, self.inner.find_by_field(resource, field, value))
            .await
    }

    async fn find_all(&self, resource: &str, filter: &Filter, page: Page) -> Result<Vec<Document>, StoreError> {
        self.run("find_all", resource, self.inner.find_all(resource, filter, page)).await
    }

    async fn insert(&self, resource: &str, doc: Document) -> Result<Document, StoreError> {
        self.run("insert", resource, self.inner.insert(resource, doc)).await
    }

    async fn replace(
        &self,
        resource: &str,
        id: &str,
        doc: Document,
        expected_etag: Option<&str>,
    ) -> Result<Option<Document>, StoreError> {
        self.run("replace", resource, self.inner.replace(resource, id, doc, expected_etag))
            .await
    }

    async fn delete(&self, resource: &str, id: &str, expected_etag: Option<&str>) -> Result<bool, StoreError> {
        self.run("delete", resource, self.inner.delete(resource, id, expected_etag))
            .await
    }

    async fn delete_all(&self, resource: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.run("delete_all", resource, self.inner.delete_all(resource, filter)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.run("ping", "-", self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledStore;

    #[async_trait]
    impl DocumentStore for StalledStore {
        async fn find_by_id(&self, _: &str, _: &str) -> Result<Option<Document>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn find_by_field(&self, _: &str, _: &str, _: &Value) -> Result<Option<Document>, StoreError> {
            Ok(None)
        }
        async fn find_all(&self, _: &str, _: &Filter, _: Page) -> Result<Vec<Document>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert(&self, _: &str, doc: Document) -> Result<Document, StoreError> {
            Ok(doc)
        }
        async fn replace(
            &self,
            _: &str,
            _: &str,
            _: Document,
            _: Option<&str>,
        ) -> Result<Option<Document>, StoreError> {
            Ok(None)
        }
        async fn delete(&self, _: &str, _: &str, _: Option<&str>) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete_all(&self, _: &str, _: &Filter) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn elapsed_deadline_is_unavailable() {
        let store = TimeoutStore::new(Arc::new(StalledStore), Duration::from_millis(20));
        let err = store.find_by_id("teachers", "t1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.delete_all("teachers", &Vec::new()).await, Ok(0));
    }

    #[test]
    fn page_bounds() {
        assert_eq!(Page::new(None, None), Page { limit: 100, offset: 0 });
        assert_eq!(Page::new(Some(5000), Some(3)), Page { limit: 1000, offset: 3 });
    }
}
