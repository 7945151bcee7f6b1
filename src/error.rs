//! Typed errors and HTTP mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Errors raised by a storage collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Timeout, refused connection, exhausted pool. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A unique constraint rejected the commit.
    #[error("duplicate value for unique field '{field}'")]
    Duplicate { field: String },
    /// The document exists but its `_etag` changed since it was read.
    #[error("etag of '{id}' no longer matches")]
    EtagMismatch { id: String },
    #[error("store backend: {0}")]
    Backend(String),
}

/// What was wrong with one field of a submitted document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    MissingRequiredField,
    TypeMismatch { expected: &'static str },
    LengthOutOfRange {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
        actual: usize,
    },
    NotAllowed,
    DuplicateValue,
    UnknownField,
    DanglingReference { resource: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Violation {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = &self.field;
        match &self.kind {
            ViolationKind::MissingRequiredField => write!(f, "{} is required", field),
            ViolationKind::TypeMismatch { expected } => write!(f, "{} must be of {} type", field, expected),
            ViolationKind::LengthOutOfRange { min, max, actual } => match (min, max) {
                (Some(min), Some(max)) => {
                    write!(f, "{} length {} is outside {}..={}", field, actual, min, max)
                }
                (Some(min), None) => write!(f, "{} must be at least {} characters", field, min),
                (None, Some(max)) => write!(f, "{} must be at most {} characters", field, max),
                (None, None) => write!(f, "{} has invalid length {}", field, actual),
            },
            ViolationKind::NotAllowed => write!(f, "{} has a value that is not allowed", field),
            ViolationKind::DuplicateValue => write!(f, "{} is not unique", field),
            ViolationKind::UnknownField => write!(f, "unknown field {}", field),
            ViolationKind::DanglingReference { resource } => {
                write!(f, "{} references a missing document in '{}'", field, resource)
            }
        }
    }
}

fn join_violations(v: &[Violation]) -> String {
    v.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {}", join_violations(.0))]
    Validation(Vec<Violation>),
    #[error("dangling reference: {}", join_violations(.0))]
    DanglingReference(Vec<Violation>),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store: {0}")]
    Store(String),
}

impl AppError {
    /// Only transient infrastructure failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    /// Violations carried by this error, empty for non-input errors.
    pub fn violations(&self) -> &[Violation] {
        match self {
            AppError::Validation(v) | AppError::DanglingReference(v) => v,
            _ => &[],
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Duplicate { field } => {
                AppError::Validation(vec![Violation::new(field, ViolationKind::DuplicateValue)])
            }
            StoreError::EtagMismatch { id } => {
                AppError::PreconditionFailed(format!("'{}' was modified", id))
            }
            StoreError::Backend(msg) => AppError::Store(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::DanglingReference(_) => (StatusCode::UNPROCESSABLE_ENTITY, "dangling_reference"),
            AppError::MethodNotAllowed(_) => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            AppError::PreconditionFailed(_) => (StatusCode::PRECONDITION_FAILED, "precondition_failed"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        };
        let violations = self.violations();
        let details = if violations.is_empty() {
            None
        } else {
            let list: Vec<serde_json::Value> = violations
                .iter()
                .map(|v| {
                    let mut entry = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
                    if let serde_json::Value::Object(ref mut m) = entry {
                        m.insert("message".into(), serde_json::Value::String(v.to_string()));
                    }
                    entry
                })
                .collect();
            Some(serde_json::Value::Array(list))
        };
        let retryable = self.is_retryable();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}
