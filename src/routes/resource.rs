//! Resource routes. Handlers resolve the resource by path segment against the registry.

use crate::handlers::resource::{
    create, delete as delete_item, delete_collection, list, read, read_by_lookup, update,
};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/:resource", get(list).post(create).delete(delete_collection))
        .route("/:resource/:id", get(read).patch(update).delete(delete_item))
        .route("/:resource/:field/:value", get(read_by_lookup))
        .with_state(state)
}
