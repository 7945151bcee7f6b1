//! ResourceGateway: per-resource CRUD enforcing validation and relation checks on writes
//! and attaching cache metadata to reads.

use crate::config::{CollectionMethod, ItemMethod, ResourceSchema, SchemaRegistry};
use crate::document::{etag_of, stamp_new, stamp_update, strip_meta, Document};
use crate::error::AppError;
use crate::service::relation::{EmbedRequest, RelationResolver};
use crate::service::validation::{coerce_value, Validator};
use crate::store::{DocumentStore, Filter, Page};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Cache metadata carried by every read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheDirective {
    pub max_age: u32,
    pub expires: DateTime<Utc>,
}

impl CacheDirective {
    pub fn new(max_age: u32, now: DateTime<Utc>) -> Self {
        CacheDirective {
            max_age,
            expires: now + Duration::seconds(max_age as i64),
        }
    }

    pub fn cache_control(&self) -> String {
        format!("max-age={}", self.max_age)
    }

    /// IMF-fixdate, as used by the `Expires` header.
    pub fn expires_http_date(&self) -> String {
        self.expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

/// A read result plus its cache metadata.
#[derive(Clone, Debug)]
pub struct Read<T> {
    pub data: T,
    pub cache: CacheDirective,
}

/// Raw list parameters; filter values are coerced to the field types.
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub filters: Vec<(String, Value)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub embedded: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Listing {
    pub items: Vec<Document>,
    pub page: Page,
}

pub struct ResourceGateway {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn DocumentStore>,
    validator: Validator,
    resolver: RelationResolver,
}

impl ResourceGateway {
    pub fn new(registry: Arc<SchemaRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        ResourceGateway {
            validator: Validator::new(store.clone()),
            resolver: RelationResolver::new(registry.clone(), store.clone()),
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        Ok(self.store.ping().await?)
    }

    fn collection(&self, resource: &str, method: CollectionMethod) -> Result<&ResourceSchema, AppError> {
        let schema = self.registry.lookup(resource)?;
        if !schema.allows_collection(method) {
            return Err(AppError::MethodNotAllowed(format!("{:?} on '{}'", method, resource)));
        }
        Ok(schema)
    }

    fn item(&self, resource: &str, method: ItemMethod) -> Result<&ResourceSchema, AppError> {
        let schema = self.registry.lookup(resource)?;
        if !schema.allows_item(method) {
            return Err(AppError::MethodNotAllowed(format!("{:?} on '{}' items", method, resource)));
        }
        Ok(schema)
    }

    fn read_cache(schema: &ResourceSchema) -> CacheDirective {
        CacheDirective::new(schema.cache.max_age, Utc::now())
    }

    pub async fn list(&self, resource: &str, query: &ListQuery) -> Result<Read<Listing>, AppError> {
        let schema = self.collection(resource, CollectionMethod::List)?;
        let embed = EmbedRequest::new(schema, query.embedded.as_slice())?;
        let filter = coerce_filter(schema, &query.filters, false)?;
        let page = Page::new(query.limit, query.offset);
        let docs = self.store.find_all(&schema.name, &filter, page).await?;
        let items = self.resolver.embed_all(schema, docs, &embed).await?;
        Ok(Read {
            data: Listing { items, page },
            cache: Self::read_cache(schema),
        })
    }

    /// Validate, check relations and insert. Returns the stored document including its assigned `_id`.
    pub async fn create(&self, resource: &str, body: Value) -> Result<Document, AppError> {
        let schema = self.collection(resource, CollectionMethod::Create)?;
        let candidate = body_to_document(body)?;
        let doc = self.validator.validate(schema, &candidate, None).await?.into_result()?;
        self.resolver.resolve(schema, &doc, &EmbedRequest::none()).await?;
        let stored = self.store.insert(&schema.name, stamp_new(doc, Utc::now())).await?;
        tracing::info!(resource = %schema.name, id = ?stored.get("_id"), "created {}", schema.item_title);
        Ok(stored)
    }

    /// Remove every document matching the filters; no cascade to referencing documents.
    /// Every filter key must name a declared field.
    pub async fn delete_collection(&self, resource: &str, filters: &[(String, Value)]) -> Result<u64, AppError> {
        let schema = self.collection(resource, CollectionMethod::Delete)?;
        let filter = coerce_filter(schema, filters, true)?;
        let removed = self.store.delete_all(&schema.name, &filter).await?;
        tracing::info!(resource = %schema.name, removed, "collection delete");
        Ok(removed)
    }

    pub async fn get<S: AsRef<str>>(
        &self,
        resource: &str,
        id: &str,
        embedded: &[S],
    ) -> Result<Read<Document>, AppError> {
        let schema = self.item(resource, ItemMethod::Get)?;
        let embed = EmbedRequest::new(schema, embedded)?;
        let doc = self
            .store
            .find_by_id(&schema.name, id)
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        let data = self.resolver.embed(schema, &doc, &embed).await?;
        Ok(Read {
            data,
            cache: Self::read_cache(schema),
        })
    }

    /// Get by the resource's declared secondary lookup field. Values the lookup pattern
    /// rejects address nothing.
    pub async fn get_by_lookup<S: AsRef<str>>(
        &self,
        resource: &str,
        field: &str,
        value: &str,
        embedded: &[S],
    ) -> Result<Read<Document>, AppError> {
        let schema = self.item(resource, ItemMethod::Get)?;
        let lookup = schema
            .secondary_lookup
            .as_ref()
            .filter(|l| l.field == field)
            .ok_or_else(|| AppError::NotFound(format!("'{}' has no lookup by '{}'", resource, field)))?;
        if !lookup.matches(value) {
            return Err(not_found(schema, value));
        }
        let embed = EmbedRequest::new(schema, embedded)?;
        let doc = self
            .store
            .find_by_field(&schema.name, &lookup.field, &Value::String(value.to_string()))
            .await?
            .ok_or_else(|| not_found(schema, value))?;
        let data = self.resolver.embed(schema, &doc, &embed).await?;
        Ok(Read {
            data,
            cache: Self::read_cache(schema),
        })
    }

    /// Merge `patch` into the stored document (`null` removes a field), then re-validate and
    /// re-resolve the full result before replacing. `if_match` is checked up front and again by
    /// the store when the replacement commits.
    pub async fn update(
        &self,
        resource: &str,
        id: &str,
        patch: Value,
        if_match: Option<&str>,
    ) -> Result<Document, AppError> {
        let schema = self.item(resource, ItemMethod::Update)?;
        let patch = body_to_document(patch)?;
        let existing = self
            .store
            .find_by_id(&schema.name, id)
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        check_precondition(&existing, if_match)?;

        let mut merged = strip_meta(&existing);
        for (k, v) in patch {
            if v.is_null() {
                merged.remove(&k);
            } else {
                merged.insert(k, v);
            }
        }
        let doc = self.validator.validate(schema, &merged, Some(id)).await?.into_result()?;
        self.resolver.resolve(schema, &doc, &EmbedRequest::none()).await?;
        let stored = self
            .store
            .replace(
                &schema.name,
                id,
                stamp_update(doc, &existing, Utc::now()),
                guarded_etag(if_match),
            )
            .await?
            .ok_or_else(|| not_found(schema, id))?;
        tracing::info!(resource = %schema.name, id, "updated {}", schema.item_title);
        Ok(stored)
    }

    pub async fn delete(&self, resource: &str, id: &str, if_match: Option<&str>) -> Result<(), AppError> {
        let schema = self.item(resource, ItemMethod::Delete)?;
        if !self.store.delete(&schema.name, id, guarded_etag(if_match)).await? {
            return Err(not_found(schema, id));
        }
        tracing::info!(resource = %schema.name, id, "deleted {}", schema.item_title);
        Ok(())
    }
}

fn not_found(schema: &ResourceSchema, key: &str) -> AppError {
    AppError::NotFound(format!("{} '{}'", schema.item_title, key))
}

fn body_to_document(value: Value) -> Result<Document, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn check_precondition(existing: &Document, if_match: Option<&str>) -> Result<(), AppError> {
    match if_match {
        Some(expected) if expected != "*" && etag_of(existing) != Some(expected) => Err(
            AppError::PreconditionFailed(format!("etag '{}' does not match", expected)),
        ),
        _ => Ok(()),
    }
}

/// Etag the store must still see at commit; `*` matches any current version.
fn guarded_etag(if_match: Option<&str>) -> Option<&str> {
    if_match.filter(|e| *e != "*")
}

/// Filters on declared fields, values coerced to the field type. Undeclared keys are ignored
/// unless `reject_unknown`.
fn coerce_filter(schema: &ResourceSchema, filters: &[(String, Value)], reject_unknown: bool) -> Result<Filter, AppError> {
    let mut out = Filter::new();
    for (name, raw) in filters {
        let Some(field) = schema.field(name) else {
            if reject_unknown {
                return Err(AppError::BadRequest(format!("'{}' has no field '{}' to filter on", schema.name, name)));
            }
            tracing::debug!(resource = %schema.name, key = %name, "ignoring undeclared filter key");
            continue;
        };
        let value = coerce_value(&field.kind, raw).ok_or_else(|| {
            AppError::BadRequest(format!("filter {} must be of {} type", name, field.kind.type_name()))
        })?;
        out.push((name.clone(), value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cache_directive_headers() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let cache = CacheDirective::new(20, now);
        assert_eq!(cache.cache_control(), "max-age=20");
        assert_eq!(cache.expires_http_date(), "Fri, 01 Mar 2024 12:00:20 GMT");
    }

    #[test]
    fn wildcard_if_match_always_passes() {
        let doc = crate::document::stamp_new(Document::new(), Utc::now());
        assert!(check_precondition(&doc, Some("*")).is_ok());
        assert!(check_precondition(&doc, None).is_ok());
        assert!(matches!(
            check_precondition(&doc, Some("stale")),
            Err(AppError::PreconditionFailed(_))
        ));
    }
}
