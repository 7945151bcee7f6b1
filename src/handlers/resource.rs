//! Resource handlers: list, create, collection delete, item get / lookup / update / delete.

use crate::document::etag_of;
use crate::error::AppError;
use crate::response::{success_many, success_one, success_one_ok, with_cache};
use crate::service::ListQuery;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

const EMBEDDED_PARAM: &str = "embedded";

fn embedded_fields(params: &HashMap<String, String>) -> Vec<String> {
    params
        .get(EMBEDDED_PARAM)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn list_query(params: HashMap<String, String>) -> Result<ListQuery, AppError> {
    let mut query = ListQuery {
        embedded: embedded_fields(&params),
        ..ListQuery::default()
    };
    for (k, v) in params {
        match k.as_str() {
            "limit" => {
                query.limit = Some(v.parse().map_err(|_| AppError::BadRequest("invalid limit".into()))?);
            }
            "offset" => {
                query.offset = Some(v.parse().map_err(|_| AppError::BadRequest("invalid offset".into()))?);
            }
            EMBEDDED_PARAM => {}
            _ => query.filters.push((k, Value::String(v))),
        }
    }
    Ok(query)
}

/// `If-Match` value with quotes and weak prefix removed.
fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().trim_start_matches("W/").trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}

pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let query = list_query(params)?;
    let read = state.gateway.list(&resource, &query).await?;
    let page = read.data.page;
    Ok(with_cache(
        success_many(read.data.items, page.limit, page.offset),
        &read.cache,
        None,
    ))
}

pub async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body?;
    let doc = state.gateway.create(&resource, body).await?;
    Ok(success_one(doc))
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let filters: Vec<(String, Value)> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let removed = state.gateway.delete_collection(&resource, &filters).await?;
    Ok(success_one_ok(serde_json::json!({ "deleted": removed })))
}

pub async fn read(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let embedded = embedded_fields(&params);
    let read = state.gateway.get(&resource, &id, embedded.as_slice()).await?;
    let etag = etag_of(&read.data).map(String::from);
    Ok(with_cache(success_one_ok(read.data), &read.cache, etag.as_deref()))
}

pub async fn read_by_lookup(
    State(state): State<AppState>,
    Path((resource, field, value)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let embedded = embedded_fields(&params);
    let read = state
        .gateway
        .get_by_lookup(&resource, &field, &value, embedded.as_slice())
        .await?;
    let etag = etag_of(&read.data).map(String::from);
    Ok(with_cache(success_one_ok(read.data), &read.cache, etag.as_deref()))
}

pub async fn update(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body?;
    let expected = if_match(&headers);
    let doc = state.gateway.update(&resource, &id, body, expected.as_deref()).await?;
    Ok(success_one_ok(doc))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let expected = if_match(&headers);
    state.gateway.delete(&resource, &id, expected.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn list_params_split_into_paging_embedding_and_filters() {
        let params: HashMap<String, String> = [
            ("limit", "5"),
            ("offset", "10"),
            ("embedded", "teacherID, studentID"),
            ("status", "created"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let q = list_query(params).unwrap();
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.offset, Some(10));
        assert_eq!(q.embedded, vec!["teacherID", "studentID"]);
        assert_eq!(q.filters, vec![("status".to_string(), Value::String("created".into()))]);
    }

    #[test]
    fn bad_limit_is_rejected() {
        let params: HashMap<String, String> = [("limit".to_string(), "-1".to_string())].into_iter().collect();
        assert!(matches!(list_query(params), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn if_match_unquotes() {
        let mut headers = HeaderMap::new();
        assert_eq!(if_match(&headers), None);
        headers.insert(header::IF_MATCH, HeaderValue::from_static("W/\"abc\""));
        assert_eq!(if_match(&headers).as_deref(), Some("abc"));
    }
}
