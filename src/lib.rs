//! Schema gateway: configuration-driven REST backend that validates documents against a
//! declarative domain schema before they reach storage.

pub mod config;
pub mod document;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, parse_domain, resolve, SchemaRegistry, StoreBackend, StoreSettings};
pub use document::Document;
pub use error::{AppError, ConfigError, StoreError, Violation, ViolationKind};
pub use response::{success_many, success_one};
pub use routes::{app, common_routes, common_routes_with_ready, resource_routes};
pub use service::{RelationResolver, ResourceGateway, Validator};
pub use state::AppState;
pub use store::{
    ensure_collections, ensure_database_exists, DocumentStore, MemoryStore, PgDocumentStore, TimeoutStore,
};
