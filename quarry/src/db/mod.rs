//! Execution gateway.
//!
//! [`Database`] opens fresh [`QueryContext`]s for registered tables and executes them. Execution
//! consumes the context: it is compiled, dispatched to the [`Driver`] and gone, whatever the
//! outcome, so no clauses survive from one call to the next.
//!
//! ```text
//! caller ──► Model / QueryContext ──► compile ──► Driver::dispatch ──► ResultEnvelope
//!                 (in memory)        (fail fast)   (only I/O point)   ({data}/{status}/{error})
//! ```
//!
//! Compile and contract errors are returned as `Err` before any I/O. Driver failures are folded
//! into the envelope's `error` field instead, so callers branch on the outcome rather than on an
//! error path. Nothing is retried here.
//!
//! # Modules
//!
//! - [`driver`]: the storage-driver trait
//! - [`postgres`]: SQLx/PostgreSQL driver
//! - [`pools`]: primary/replica pool routing
//! - [`errors`]: driver error classification

pub mod driver;
pub mod errors;
pub mod pools;
pub mod postgres;

use crate::config::Config;
use crate::errors::Result;
use crate::orm::Model;
use crate::query::{QueryContext, Statement};
use crate::schema::Registry;
use crate::types::{Row, Value};
use driver::{Driver, DriverOutput};
use errors::DbError;
use pools::DbPools;
use postgres::PgDriver;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Uniform result of one execution: `{data}`, `{status}` or `{error}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WriteStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a write.
///
/// `insert_id` is the first inserted primary key when it is an integer, `0` otherwise;
/// `inserted_keys` carries every returned key as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStatus {
    pub insert_id: i64,
    pub affected_rows: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserted_keys: Vec<Value>,
}

impl ResultEnvelope {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn from_output(output: DriverOutput, primary_key: &str) -> Self {
        match output {
            DriverOutput::Rows(rows) => Self {
                data: Some(Value::Array(rows.into_iter().map(Value::Object).collect())),
                ..Default::default()
            },
            DriverOutput::Written { affected_rows, returned } => {
                let inserted_keys: Vec<Value> = returned
                    .into_iter()
                    .map(|mut row| row.remove(primary_key).unwrap_or(Value::Null))
                    .collect();
                let insert_id = inserted_keys.first().and_then(Value::as_i64).unwrap_or(0);
                Self {
                    status: Some(WriteStatus {
                        insert_id,
                        affected_rows,
                        inserted_keys,
                    }),
                    ..Default::default()
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self.data {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(row) => Some(row),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Execution-time knobs, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Abort a dispatch that takes longer than this
    pub statement_timeout: Option<Duration>,
    /// Dispatches at or above this duration are logged at warn level
    pub slow_statement_threshold: Duration,
    /// Global opt-in for update/delete without conditions
    pub allow_unscoped_writes: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            statement_timeout: Some(Duration::from_secs(30)),
            slow_statement_threshold: Duration::from_millis(1000),
            allow_unscoped_writes: false,
        }
    }
}

impl From<&Config> for ExecutionSettings {
    fn from(config: &Config) -> Self {
        Self {
            statement_timeout: config.statement_timeout,
            slow_statement_threshold: Duration::from_millis(config.slow_statement_threshold_ms),
            allow_unscoped_writes: config.allow_unscoped_writes,
        }
    }
}

/// The execution gateway. Cheap to clone; clones share the registry and the driver.
#[derive(Clone)]
pub struct Database {
    registry: Arc<Registry>,
    driver: Arc<dyn Driver>,
    settings: ExecutionSettings,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn Driver>) -> Self {
        Self {
            registry,
            driver,
            settings: ExecutionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the registry from the configured model declarations and connect a PostgreSQL driver.
    pub async fn connect(config: &Config) -> Result<Self> {
        let registry = Arc::new(Registry::from_declarations(config.models.clone())?);
        let pools = DbPools::connect(&config.database).await.map_err(DbError::from)?;
        info!(
            models = registry.len(),
            read_replica = pools.has_replica(),
            "Database gateway ready"
        );
        Ok(Self::new(registry, Arc::new(PgDriver::new(pools))).with_settings(ExecutionSettings::from(config)))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Release the driver's connections. Statements dispatched afterwards fail.
    pub async fn close(&self) {
        self.driver.close().await;
    }

    /// Open a fresh query context for a registered table.
    pub fn table(&self, name: &str) -> Result<QueryContext> {
        Ok(QueryContext::new(self.registry.schema(name)?))
    }

    /// Handle to the model registered for `table`.
    pub fn model(&self, table: &str) -> Result<Model> {
        Model::new(self.clone(), table)
    }

    /// Compile and dispatch `context`, consuming it.
    pub async fn execute(&self, context: QueryContext) -> Result<ResultEnvelope> {
        self.execute_with(context, &CancellationToken::new()).await
    }

    /// Like [`Database::execute`], aborting the dispatch when `cancel` fires.
    #[instrument(skip_all, fields(table = %context.table()))]
    pub async fn execute_with(&self, context: QueryContext, cancel: &CancellationToken) -> Result<ResultEnvelope> {
        let context = if self.settings.allow_unscoped_writes {
            context.affect_all_rows()
        } else {
            context
        };
        let statement = context.compile()?;
        let primary_key = context.schema().primary_key().to_string();
        drop(context);

        Ok(self.dispatch(&statement, &primary_key, cancel).await)
    }

    async fn dispatch(&self, statement: &Statement, primary_key: &str, cancel: &CancellationToken) -> ResultEnvelope {
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DbError::Cancelled),
            result = with_timeout(self.settings.statement_timeout, self.driver.dispatch(statement)) => result,
        };

        let elapsed = started.elapsed();
        if elapsed >= self.settings.slow_statement_threshold {
            warn!(
                kind = %statement.kind,
                elapsed_ms = elapsed.as_millis() as u64,
                sql = %statement.sql,
                "Slow statement"
            );
        }

        match outcome {
            Ok(output) => {
                debug!(kind = %statement.kind, params = statement.params.len(), elapsed_ms = elapsed.as_millis() as u64, "Statement executed");
                ResultEnvelope::from_output(output, primary_key)
            }
            Err(e) => {
                match &e {
                    DbError::Other(_) => tracing::error!(kind = %statement.kind, "Statement failed: {:#}", e),
                    _ => warn!(kind = %statement.kind, "Statement failed: {}", e),
                }
                ResultEnvelope::failure(e.to_string())
            }
        }
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, dispatch: F) -> errors::Result<DriverOutput>
where
    F: Future<Output = errors::Result<DriverOutput>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, dispatch)
            .await
            .unwrap_or_else(|_| Err(DbError::Timeout(limit))),
        None => dispatch.await,
    }
}
