//! Validation, relation resolution and the resource gateway built on them.

mod gateway;
mod relation;
mod validation;
pub use gateway::{CacheDirective, ListQuery, Listing, Read, ResourceGateway};
pub use relation::{project, EmbedRequest, Embedded, RelationResolver};
pub use validation::{check_document, coerce_value, ValidationResult, Validator};
