//! Test utilities (available with `test-utils` feature).

use crate::db::Database;
use crate::db::driver::{Driver, DriverOutput};
use crate::db::errors::{DbError, Result};
use crate::query::Statement;
use crate::schema::Registry;
use crate::types::{Row, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Driver that records every dispatched statement and replays queued outputs in order.
///
/// With nothing queued, selects return no rows and writes report zero affected rows.
#[derive(Debug, Default)]
pub struct MockDriver {
    statements: Mutex<Vec<Statement>>,
    responses: Mutex<VecDeque<std::result::Result<DriverOutput, String>>>,
    delay: Option<Duration>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every dispatch, for cancellation and timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue rows for the next select. Non-object values are skipped.
    pub fn push_rows(&self, rows: Vec<Value>) {
        self.push(Ok(DriverOutput::Rows(into_rows(rows))));
    }

    /// Queue the outcome of the next write; `returned` holds the `RETURNING` rows.
    pub fn push_written(&self, affected_rows: u64, returned: Vec<Value>) {
        self.push(Ok(DriverOutput::Written {
            affected_rows,
            returned: into_rows(returned),
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.push(Err(message.to_string()));
    }

    /// Statements dispatched so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn push(&self, response: std::result::Result<DriverOutput, String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }
}

fn into_rows(values: Vec<Value>) -> Vec<Row> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Driver for MockDriver {
    async fn dispatch(&self, statement: &Statement) -> Result<DriverOutput> {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(DbError::Other(anyhow::anyhow!(message))),
            None if statement.kind.is_read() => Ok(DriverOutput::Rows(Vec::new())),
            None => Ok(DriverOutput::Written {
                affected_rows: 0,
                returned: Vec::new(),
            }),
        }
    }
}

/// Users, posts, comments and profiles, with relations in both directions (so the graph has
/// cycles).
pub fn sample_registry() -> Registry {
    let built = Registry::builder()
        .init(
            "users",
            ["id", "name", "email", "password", "age", "role"],
            "id",
            ["name", "email", "password"],
        )
        .has_many("posts", "posts", "user_id")
        .has_one("profile", "profiles", "user_id")
        .init("posts", ["id", "user_id", "title", "body"], "id", ["user_id", "title", "body"])
        .belongs_to("author", "users", "user_id")
        .has_many("comments", "comments", "post_id")
        .init("comments", ["id", "post_id", "user_id", "body"], "id", ["post_id", "user_id", "body"])
        .belongs_to("post", "posts", "post_id")
        .belongs_to("author", "users", "user_id")
        .init("profiles", ["id", "user_id", "bio"], "id", ["bio"])
        .belongs_to("user", "users", "user_id")
        .build();

    match built {
        Ok(registry) => registry,
        Err(e) => panic!("sample registry is invalid: {e}"),
    }
}

/// A gateway over [`sample_registry`] backed by a fresh [`MockDriver`].
pub fn sample_database() -> (Database, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::new());
    let db = Database::new(Arc::new(sample_registry()), driver.clone());
    (db, driver)
}
