//! Process configuration.
//!
//! Layered, later sources win:
//! - built-in defaults
//! - optional TOML file (`CRUDAPI_CONFIG`, else `crudapi.toml` when present)
//! - `CRUDAPI_*` environment variables (`CRUDAPI_PORT=9000`, `CRUDAPI_RETRY__MAX_RETRIES=5`)
//! - unprefixed `DATABASE_URL` and `LOG_LEVEL`

use crate::error::SettingsError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Schema whose base tables are exposed.
    pub db_schema: String,
    /// Mount point of the generated routes.
    pub route_prefix: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
    /// Allowed CORS origins; `*` allows any. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,
    /// Tables never exposed, even when they have a primary key.
    pub exclude_tables: Vec<String>,
    /// Server-managed columns: rejected in write payloads and left out of responses.
    pub hidden_columns: Vec<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub retry: RetrySettings,
    /// Enables `DELETE /T` with filters.
    pub allow_bulk_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/postgres".into(),
            host: "0.0.0.0".into(),
            port: 8000,
            log_level: "info".into(),
            db_schema: "public".into(),
            route_prefix: "/crud".into(),
            default_page_size: 50,
            max_page_size: 1000,
            request_timeout_secs: 30,
            body_limit_bytes: 1024 * 1024,
            cors_origins: Vec::new(),
            exclude_tables: Vec::new(),
            hidden_columns: vec!["created_at".into(), "updated_at".into()],
            max_connections: 10,
            acquire_timeout_secs: 5,
            retry: RetrySettings::default(),
            allow_bulk_delete: false,
        }
    }
}

impl Settings {
    pub fn figment() -> Figment {
        let file = std::env::var("CRUDAPI_CONFIG").unwrap_or_else(|_| "crudapi.toml".into());
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("CRUDAPI_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["database_url", "log_level"]))
    }

    /// Load and validate from the default provider stack.
    pub fn load() -> Result<Self, SettingsError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, SettingsError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(SettingsError::Invalid {
                key: "default_page_size",
                message: "page sizes must be at least 1".into(),
            });
        }
        if self.default_page_size > self.max_page_size {
            return Err(SettingsError::Invalid {
                key: "default_page_size",
                message: format!(
                    "default page size {} exceeds maximum {}",
                    self.default_page_size, self.max_page_size
                ),
            });
        }
        let prefix = Regex::new(r"^(/[A-Za-z0-9_.\-]+)*/?$").map_err(|e| SettingsError::Invalid {
            key: "route_prefix",
            message: e.to_string(),
        })?;
        if !self.route_prefix.starts_with('/') || !prefix.is_match(&self.route_prefix) {
            return Err(SettingsError::Invalid {
                key: "route_prefix",
                message: format!("'{}' is not an absolute path", self.route_prefix),
            });
        }
        if self.db_schema.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "db_schema",
                message: "schema name must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Route prefix without a trailing slash; empty when mounted at the root.
    pub fn normalized_prefix(&self) -> &str {
        self.route_prefix.trim_end_matches('/')
    }

    /// Tracing filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> String {
        let level = self.log_level.to_lowercase();
        format!("crudapi={level},tower_http={level}")
    }
}
