//! Shared application state for all routes. The registry inside the gateway is immutable.

use crate::service::ResourceGateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ResourceGateway>,
}

impl AppState {
    pub fn new(gateway: ResourceGateway) -> Self {
        AppState {
            gateway: Arc::new(gateway),
        }
    }
}
