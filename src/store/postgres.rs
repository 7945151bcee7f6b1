//! PostgreSQL document storage: one JSONB table per resource, unique expression indexes.

use super::{DocumentStore, Filter, Page};
use crate::config::SchemaRegistry;
use crate::document::{Document, ID_FIELD};
use crate::error::StoreError;
use crate::sql::{self, bind_all, bind_all_scalar, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, PgPool};
use std::collections::HashMap;

pub struct PgDocumentStore {
    pool: PgPool,
    schema: String,
    /// Unique index name -> guarded field, for reporting constraint violations.
    field_by_constraint: HashMap<String, String>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, schema: impl Into<String>, registry: &SchemaRegistry) -> Self {
        let field_by_constraint = registry
            .schemas()
            .flat_map(|s| {
                s.unique_fields()
                    .map(|f| (sql::unique_index_name(&s.name, &f.name), f.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        PgDocumentStore {
            pool,
            schema: schema.into(),
            field_by_constraint,
        }
    }

    fn map_err(&self, e: sqlx::Error) -> StoreError {
        match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                let field = db
                    .constraint()
                    .and_then(|c| self.field_by_constraint.get(c))
                    .cloned()
                    .unwrap_or_else(|| ID_FIELD.to_string());
                StoreError::Duplicate { field }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                tracing::warn!(error = %e, "store unavailable");
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }

    async fn fetch_optional(&self, q: QueryBuf) -> Result<Option<Document>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all_scalar(sqlx::query_scalar::<_, Value>(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        row.map(into_document).transpose()
    }

    async fn fetch_all(&self, q: QueryBuf) -> Result<Vec<Document>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all_scalar(sqlx::query_scalar::<_, Value>(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        rows.into_iter().map(into_document).collect()
    }

    async fn execute(&self, q: QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = bind_all(sqlx::query(&q.sql), &q.params)
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(result.rows_affected())
    }

    /// A guarded write that touched no row: the row is either gone or its etag moved on.
    async fn missed_guard(&self, resource: &str, id: &str, expected_etag: Option<&str>) -> Result<(), StoreError> {
        if expected_etag.is_none() {
            return Ok(());
        }
        match self.fetch_optional(sql::select_by_id(&self.schema, resource, id)).await? {
            Some(_) => Err(StoreError::EtagMismatch { id: id.to_string() }),
            None => Ok(()),
        }
    }
}

fn into_document(v: Value) -> Result<Document, StoreError> {
    match v {
        Value::Object(m) => Ok(m),
        other => Err(StoreError::Backend(format!("stored document is not an object: {}", other))),
    }
}

fn require_id(doc: &Document) -> Result<String, StoreError> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| StoreError::Backend(format!("document without {}", ID_FIELD)))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.fetch_optional(sql::select_by_id(&self.schema, resource, id)).await
    }

    async fn find_by_field(
        &self,
        resource: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StoreError> {
        self.fetch_optional(sql::select_by_field(&self.schema, resource, field, value))
            .await
    }

    async fn find_all(&self, resource: &str, filter: &Filter, page: Page) -> Result<Vec<Document>, StoreError> {
        self.fetch_all(sql::select_list(&self.schema, resource, filter, page)).await
    }

    async fn insert(&self, resource: &str, doc: Document) -> Result<Document, StoreError> {
        let id = require_id(&doc)?;
        let q = sql::insert(&self.schema, resource, &id, Value::Object(doc));
        self.fetch_optional(q)
            .await?
            .ok_or_else(|| StoreError::Backend("insert returned no row".into()))
    }

    async fn replace(
        &self,
        resource: &str,
        id: &str,
        doc: Document,
        expected_etag: Option<&str>,
    ) -> Result<Option<Document>, StoreError> {
        let q = sql::replace(&self.schema, resource, id, Value::Object(doc), expected_etag);
        match self.fetch_optional(q).await? {
            Some(stored) => Ok(Some(stored)),
            None => self.missed_guard(resource, id, expected_etag).await.map(|()| None),
        }
    }

    async fn delete(&self, resource: &str, id: &str, expected_etag: Option<&str>) -> Result<bool, StoreError> {
        if self.execute(sql::delete(&self.schema, resource, id, expected_etag)).await? > 0 {
            return Ok(true);
        }
        self.missed_guard(resource, id, expected_etag).await.map(|()| false)
    }

    async fn delete_all(&self, resource: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.execute(sql::delete_matching(&self.schema, resource, filter)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .fetch_optional(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| self.map_err(e))
    }
}

/// Create the schema, one table per registered resource and a unique index per unique field. Idempotent.
pub async fn ensure_collections(pool: &PgPool, schema: &str, registry: &SchemaRegistry) -> Result<(), StoreError> {
    let to_store_err = |e: sqlx::Error| StoreError::Backend(e.to_string());
    sqlx::query(&sql::create_schema(schema))
        .execute(pool)
        .await
        .map_err(to_store_err)?;
    for resource in registry.schemas() {
        sqlx::query(&sql::create_collection(schema, &resource.name))
            .execute(pool)
            .await
            .map_err(to_store_err)?;
        for field in resource.unique_fields() {
            sqlx::query(&sql::create_unique_index(schema, &resource.name, &field.name))
                .execute(pool)
                .await
                .map_err(to_store_err)?;
        }
        tracing::info!(schema, resource = %resource.name, "collection ready");
    }
    Ok(())
}

/// Ensure the database named in `opts` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(opts: &PgConnectOptions) -> Result<(), StoreError> {
    let db_name = opts.get_database().unwrap_or("").to_string();
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let mut conn: sqlx::PgConnection = opts
        .clone()
        .database("postgres")
        .connect()
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!(database = %db_name, "created database");
    }
    Ok(())
}
