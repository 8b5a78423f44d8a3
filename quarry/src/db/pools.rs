//! Database pool abstraction supporting read replicas.
//!
//! ```text
//! ┌─────────────┐
//! │   DbPools   │
//! └──────┬──────┘
//!        │
//!   ┌────┴────┐
//!   ↓         ↓
//! ┌───────┐ ┌─────────┐
//! │Primary│ │ Replica │ (optional)
//! └───────┘ └─────────┘
//! ```
//!
//! Reads (`SELECT`) are routed to the replica when one is configured; writes always go to the
//! primary.

use crate::config::{DatabaseConfig, PoolSettings};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Primary pool plus an optional read replica.
#[derive(Clone, Debug)]
pub struct DbPools {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl DbPools {
    /// Create a new DbPools with only a primary pool.
    pub fn new(primary: PgPool) -> Self {
        Self { primary, replica: None }
    }

    /// Create a new DbPools with primary and replica pools.
    pub fn with_replica(primary: PgPool, replica: PgPool) -> Self {
        Self {
            primary,
            replica: Some(replica),
        }
    }

    /// Connect the pools described by the database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let primary = pool_options(&config.pool).connect(&config.url).await?;
        info!(max_connections = config.pool.max_connections, "Connected primary pool");

        match &config.replica_url {
            Some(url) => {
                let replica = pool_options(config.replica_pool.as_ref().unwrap_or(&config.pool))
                    .connect(url)
                    .await?;
                info!("Connected read replica pool");
                Ok(Self::with_replica(primary, replica))
            }
            None => Ok(Self::new(primary)),
        }
    }

    /// Pool for read-only statements: the replica if configured, otherwise the primary.
    pub fn read(&self) -> &PgPool {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Pool for writes and reads that need read-after-write consistency.
    pub fn write(&self) -> &PgPool {
        &self.primary
    }

    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }

    /// Close both primary and replica pools (if configured).
    pub async fn close(&self) {
        self.primary.close().await;
        if let Some(replica) = &self.replica {
            replica.close().await;
        }
    }
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let mut options = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));

    // 0 means "never" for both timeouts
    if settings.idle_timeout_secs > 0 {
        options = options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
    }
    if settings.max_lifetime_secs > 0 {
        options = options.max_lifetime(Duration::from_secs(settings.max_lifetime_secs));
    }
    options
}
