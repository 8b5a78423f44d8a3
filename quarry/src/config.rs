//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `quarry.yaml` and can be changed with the `-f` flag or the `QUARRY_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Later sources override earlier ones:
//!
//! 1. **YAML config file** - Base configuration (default: `quarry.yaml`)
//! 2. **Environment variables** - Variables prefixed with `QUARRY_` override YAML values
//! 3. **DATABASE_URL** / **DATABASE_REPLICA_URL** - Override `database.url` / `database.replica_url`
//!
//! Nested values use double underscores, e.g. `QUARRY_DATABASE__POOL__MAX_CONNECTIONS=20`.
//!
//! ## Example
//!
//! ```yaml
//! database:
//!   url: postgres://localhost/app
//!   pool:
//!     max_connections: 20
//! statement_timeout: 10s
//! models:
//!   - table: users
//!     columns: [id, name, email, password]
//!     fillable: [name, email, password]
//!     relations:
//!       - { name: posts, kind: has_many, model: posts, foreign_key: user_id }
//!   - table: posts
//!     columns: [id, user_id, title, published_at]
//!     fillable: [user_id, title, published_at]
//!     types: { published_at: timestamptz }
//!     relations:
//!       - { name: author, kind: belongs_to, model: users, foreign_key: user_id }
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;
use crate::schema::{ModelDeclaration, Registry};

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "QUARRY_CONFIG", default_value = "quarry.yaml")]
    pub config: String,

    /// Validate configuration and model declarations, then exit without connecting.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Set from `DATABASE_URL`; folded into `database.url` on load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Set from `DATABASE_REPLICA_URL`; folded into `database.replica_url` on load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_replica_url: Option<String>,
    /// Abort statements that run longer than this (default: 30s)
    #[serde(with = "humantime_serde")]
    pub statement_timeout: Option<Duration>,
    /// Threshold in milliseconds for logging slow statements (default: 1000ms)
    pub slow_statement_threshold_ms: u64,
    /// Allow update/delete without conditions on every chain
    pub allow_unscoped_writes: bool,
    /// Export traces over OTLP (configured through `OTEL_*` environment variables)
    pub enable_otel_export: bool,
    /// Models to register at startup
    pub models: Vec<ModelDeclaration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            database_url: None,
            database_replica_url: None,
            statement_timeout: Some(Duration::from_secs(30)),
            slow_statement_threshold_ms: 1000,
            allow_unscoped_writes: false,
            enable_otel_export: false,
            models: Vec::new(),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string for the primary
    pub url: String,
    /// Optional read replica; reads are routed there when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_url: Option<String>,
    /// Primary pool settings (also used for the replica unless `replica_pool` is set)
    pub pool: PoolSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_pool: Option<PoolSettings>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/quarry".to_string(),
            replica_url: None,
            pool: PoolSettings::default(),
            replica_pool: None,
        }
    }
}

/// Individual pool configuration with all SQLx parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }
        if let Some(replica_url) = config.database_replica_url.take() {
            config.database.replica_url = Some(replica_url);
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.url.trim().is_empty() {
            return Err(invalid("database.url must not be empty"));
        }

        let pools = std::iter::once(("database.pool", &self.database.pool))
            .chain(self.database.replica_pool.as_ref().map(|p| ("database.replica_pool", p)));
        for (name, pool) in pools {
            if pool.max_connections == 0 {
                return Err(invalid(format!("{name}.max_connections must be greater than 0")));
            }
            if pool.min_connections > pool.max_connections {
                return Err(invalid(format!(
                    "{name}.min_connections ({}) cannot be greater than max_connections ({})",
                    pool.min_connections, pool.max_connections
                )));
            }
        }

        if self.statement_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("statement_timeout must be greater than 0"));
        }

        Registry::from_declarations(self.models.clone())?;
        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("QUARRY_").ignore(&["config"]).split("__"))
            // Common DATABASE_URL and DATABASE_REPLICA_URL patterns
            .merge(Env::raw().only(&["DATABASE_URL", "DATABASE_REPLICA_URL"]))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Other(anyhow::anyhow!("Config validation: {}", message.into()))
}
