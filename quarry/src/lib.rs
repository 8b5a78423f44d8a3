//! # quarry: a lightweight relational data access engine
//!
//! `quarry` turns fluent method chains into parameterized SQL, runs them against PostgreSQL and
//! hands back uniform result envelopes. It is organised around four pieces:
//!
//! - **Schema registry** ([`schema`]): every model's table name, columns, primary key, fillable
//!   allow-list and named relation edges, validated once at startup.
//! - **Query builder** ([`query`]): a [`QueryContext`] per fluent chain accumulating projection,
//!   condition tree, grouping, ordering, limits, aggregates or a pending write, and a
//!   deterministic compile step producing statement text plus positional parameters.
//! - **Execution gateway** ([`db`]): [`Database`] opens contexts, compiles them and dispatches
//!   them to a [`Driver`] under a statement timeout and an optional cancellation token.
//! - **Models** ([`orm`]): [`Model`] wraps one table with `get`/`all`/`find`/`create`/`update`/
//!   `delete` and dot-path eager loading (`with("posts.comments")`) over a cyclic relation graph.
//!
//! ## Example
//!
//! ```no_run
//! use quarry::{Config, Database, Direction, cond};
//!
//! # async fn run(config: Config) -> quarry::Result<()> {
//! let db = Database::connect(&config).await?;
//! let users = db.model("users")?;
//!
//! let adults = users
//!     .where_(vec![cond("age", ">", 18)])
//!     .with(["posts.comments", "posts.author"])
//!     .order_by("name", Direction::Desc)
//!     .limit(10)
//!     .get()
//!     .await?;
//!
//! let created = users
//!     .create(&[serde_json::json!({"name": "A", "email": "a@x.com", "password": "p"})])
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Compile errors and caller misuse (an empty insert, an update or delete without a condition)
//! fail fast as [`Error`] before anything is dispatched. Failures inside the database are carried
//! in the result instead (`{"error": "..."}`), so callers can branch on the outcome directly.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and environment overrides; [`telemetry`] for tracing and
//! OTLP export.

pub mod config;
pub mod db;
pub mod errors;
pub mod orm;
pub mod query;
pub mod schema;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

pub use config::Config;
pub use db::driver::{Driver, DriverOutput};
pub use db::{Database, ExecutionSettings, ResultEnvelope, WriteStatus};
pub use errors::{Error, Result};
pub use orm::{Model, ModelQuery, ReadResult, WriteResult};
pub use query::{Condition, ConditionBuilder, Conditions, QueryContext, Statement, cond};
pub use schema::{ModelDeclaration, Registry, RegistryBuilder, RelationDeclaration, RelationKind, TableSchema};
pub use types::{AggregateFn, BooleanOp, Direction, Row, Value};
