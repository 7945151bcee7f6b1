//! School API: serves teachers, students and courses from `sample/domain.json`.
//!
//! Run from repo root: `cargo run -p school-api`
//! `STORE_BACKEND=postgres` switches from the in-memory store to PostgreSQL.

use schema_gateway::{
    app, ensure_collections, ensure_database_exists, load_from_path, AppState, DocumentStore, MemoryStore,
    PgDocumentStore, ResourceGateway, StoreBackend, StoreSettings, TimeoutStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_CONFIG_PATH: &str = "sample/domain.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("schema_gateway=info,school_api=info")),
        )
        .init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let registry = Arc::new(load_from_path(&config_path).await?);
    let settings = StoreSettings::from_env();

    let store: Arc<dyn DocumentStore> = match settings.backend {
        StoreBackend::Postgres => {
            let connect = settings.connect_options()?;
            ensure_database_exists(&connect).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(settings.timeout)
                .connect_with(connect)
                .await?;
            ensure_collections(&pool, &settings.schema, &registry).await?;
            Arc::new(PgDocumentStore::new(pool, settings.schema.clone(), &registry))
        }
        StoreBackend::Memory => Arc::new(MemoryStore::for_registry(&registry)),
    };
    tracing::info!(backend = ?settings.backend, timeout_ms = settings.timeout.as_millis() as u64, "store ready");
    let store = Arc::new(TimeoutStore::new(store, settings.timeout));

    let state = AppState::new(ResourceGateway::new(registry, store));
    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(3000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("School API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
