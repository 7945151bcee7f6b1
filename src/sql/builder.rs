//! Builds parameterized statements against one-table-per-resource document storage.
//! Each table holds `id TEXT`, `doc JSONB` and bookkeeping timestamps.

use crate::sql::SqlParam;
use crate::store::{Filter, Page};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Name of the unique index guarding `field`.
pub fn unique_index_name(resource: &str, field: &str) -> String {
    format!("{}_{}_key", resource, field)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl QueryBuf {
    fn new(sql: String) -> Self {
        QueryBuf { sql, params: Vec::new() }
    }

    fn param(mut self, p: SqlParam) -> Self {
        self.params.push(p);
        self
    }
}

fn filter_object(filter: &Filter) -> Value {
    let mut m = Map::new();
    for (k, v) in filter {
        m.insert(k.clone(), v.clone());
    }
    Value::Object(m)
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

pub fn create_collection(schema: &str, resource: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            doc JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        qualified_table(schema, resource)
    )
}

/// Expression index over the field's text value; the storage-side authority for uniqueness.
pub fn create_unique_index(schema: &str, resource: &str, field: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ((doc ->> {}))",
        quoted(&unique_index_name(resource, field)),
        qualified_table(schema, resource),
        literal(field)
    )
}

pub fn select_by_id(schema: &str, resource: &str, id: &str) -> QueryBuf {
    QueryBuf::new(format!(
        "SELECT doc FROM {} WHERE id = $1",
        qualified_table(schema, resource)
    ))
    .param(SqlParam::Text(id.to_string()))
}

pub fn select_by_field(schema: &str, resource: &str, field: &str, value: &Value) -> QueryBuf {
    QueryBuf::new(format!(
        "SELECT doc FROM {} WHERE doc -> $1 = $2 ORDER BY created_at, id LIMIT 1",
        qualified_table(schema, resource)
    ))
    .param(SqlParam::Text(field.to_string()))
    .param(SqlParam::Json(value.clone()))
}

/// Exact-match filters become a single JSONB containment test.
pub fn select_list(schema: &str, resource: &str, filter: &Filter, page: Page) -> QueryBuf {
    QueryBuf::new(format!(
        "SELECT doc FROM {} WHERE doc @> $1 ORDER BY created_at, id LIMIT $2 OFFSET $3",
        qualified_table(schema, resource)
    ))
    .param(SqlParam::Json(filter_object(filter)))
    .param(SqlParam::I64(page.limit as i64))
    .param(SqlParam::I64(page.offset as i64))
}

pub fn insert(schema: &str, resource: &str, id: &str, doc: Value) -> QueryBuf {
    QueryBuf::new(format!(
        "INSERT INTO {} (id, doc) VALUES ($1, $2) RETURNING doc",
        qualified_table(schema, resource)
    ))
    .param(SqlParam::Text(id.to_string()))
    .param(SqlParam::Json(doc))
}

/// Optional `_etag` guard evaluated in the same statement as the write.
fn etag_guard(mut q: QueryBuf, expected_etag: Option<&str>) -> QueryBuf {
    match expected_etag {
        Some(etag) => {
            q.sql.push_str(&format!(" AND doc ->> '_etag' = ${}", q.params.len() + 1));
            q.param(SqlParam::Text(etag.to_string()))
        }
        None => q,
    }
}

pub fn replace(schema: &str, resource: &str, id: &str, doc: Value, expected_etag: Option<&str>) -> QueryBuf {
    let q = QueryBuf::new(format!(
        "UPDATE {} SET doc = $2, updated_at = NOW() WHERE id = $1",
        qualified_table(schema, resource)
    ))
    .param(SqlParam::Text(id.to_string()))
    .param(SqlParam::Json(doc));
    let mut q = etag_guard(q, expected_etag);
    q.sql.push_str(" RETURNING doc");
    q
}

pub fn delete(schema: &str, resource: &str, id: &str, expected_etag: Option<&str>) -> QueryBuf {
    let q = QueryBuf::new(format!("DELETE FROM {} WHERE id = $1", qualified_table(schema, resource)))
        .param(SqlParam::Text(id.to_string()));
    etag_guard(q, expected_etag)
}

pub fn delete_matching(schema: &str, resource: &str, filter: &Filter) -> QueryBuf {
    QueryBuf::new(format!("DELETE FROM {} WHERE doc @> $1", qualified_table(schema, resource)))
        .param(SqlParam::Json(filter_object(filter)))
}
