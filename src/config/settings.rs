//! Process settings for the storage collaborator, read once from the environment.

use crate::error::ConfigError;
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub dbname: String,
    /// Schema holding one table per resource.
    pub schema: String,
    pub timeout: Duration,
    /// Full connection URL from `DATABASE_URL`; wins over the individual parts.
    pub url_override: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            backend: StoreBackend::Memory,
            host: "localhost".into(),
            port: 5432,
            username: String::new(),
            password: String::new(),
            dbname: "school".into(),
            schema: "public".into(),
            timeout: Duration::from_millis(5000),
            url_override: None,
        }
    }
}

impl StoreSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup. Unparseable numbers keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = StoreSettings::default();
        let backend = match get("STORE_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            Some("postgres") | Some("postgresql") => StoreBackend::Postgres,
            _ => StoreBackend::Memory,
        };
        StoreSettings {
            backend,
            host: get("STORE_HOST").unwrap_or(d.host),
            port: get("STORE_PORT").and_then(|p| p.parse().ok()).unwrap_or(d.port),
            username: get("STORE_USERNAME").unwrap_or(d.username),
            password: get("STORE_PASSWORD").unwrap_or(d.password),
            dbname: get("STORE_DBNAME").unwrap_or(d.dbname),
            schema: get("STORE_SCHEMA").unwrap_or(d.schema),
            timeout: get("STORE_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(d.timeout),
            url_override: get("DATABASE_URL").filter(|s| !s.is_empty()),
        }
    }

    /// Connection options from the individual parts, or parsed from `DATABASE_URL` when set.
    /// Empty credentials fall back to libpq defaults (`PGUSER`, `PGPASSWORD`).
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if let Some(url) = &self.url_override {
            return PgConnectOptions::from_str(url)
                .map_err(|e| ConfigError::Load(format!("DATABASE_URL: {}", e)));
        }
        let mut opts = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname);
        if !self.username.is_empty() {
            opts = opts.username(&self.username);
        }
        if !self.password.is_empty() {
            opts = opts.password(&self.password);
        }
        Ok(opts)
    }
}
