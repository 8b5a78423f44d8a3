//! PostgreSQL implementation of [`Driver`].
//!
//! Rows are read back as JSON objects by wrapping the compiled statement: selects become
//! `SELECT to_jsonb(q) FROM (<statement>) AS q ORDER BY ...` and inserts run as a data-modifying
//! CTE so their `RETURNING` keys come back the same way. Updates and deletes report
//! `rows_affected`.
//!
//! A subquery's order is not carried to the outer query, so the statement's sort keys are applied
//! again on `q`. Sort-only columns are removed from the JSON rows.

use super::driver::{Driver, DriverOutput};
use super::errors::Result;
use super::pools::DbPools;
use crate::query::Statement;
use crate::types::{Row, StatementKind, Value};
use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row as _};
use tracing::{instrument, trace};

/// Driver dispatching compiled statements over SQLx connection pools.
#[derive(Clone, Debug)]
pub struct PgDriver {
    pools: DbPools,
}

impl PgDriver {
    pub fn new(pools: DbPools) -> Self {
        Self { pools }
    }
}

/// Wrap a compiled select so every row comes back as one JSON object, in statement order.
fn select_as_json(statement: &Statement) -> String {
    let row = if statement.hidden.is_empty() {
        "to_jsonb(q)".to_string()
    } else {
        let hidden = statement
            .hidden
            .iter()
            .map(|name| format!("'{}'", name.replace('\'', "''")))
            .collect::<Vec<_>>();
        format!("to_jsonb(q) - ARRAY[{}]::text[]", hidden.join(", "))
    };
    let mut sql = format!("SELECT {row} AS row FROM ({}) AS q", statement.sql);
    if !statement.ordering.is_empty() {
        let keys = statement.ordering.iter().map(|key| format!("q.{key}")).collect::<Vec<_>>();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }
    sql
}

#[async_trait]
impl Driver for PgDriver {
    #[instrument(skip(self, statement), fields(table = %statement.table, kind = %statement.kind, params = statement.params.len()), err)]
    async fn dispatch(&self, statement: &Statement) -> Result<DriverOutput> {
        let pool = if statement.kind.is_read() {
            self.pools.read()
        } else {
            self.pools.write()
        };

        // Returned to the pool when dropped, on every exit path
        let mut conn = pool.acquire().await?;

        match statement.kind {
            StatementKind::Select => {
                let sql = select_as_json(statement);
                let rows = fetch_json_rows(&mut conn, &sql, &statement.params).await?;
                trace!(rows = rows.len(), "Fetched rows");
                Ok(DriverOutput::Rows(rows))
            }
            StatementKind::Insert => {
                let sql = format!("WITH q AS ({}) SELECT to_jsonb(q) AS row FROM q", statement.sql);
                let returned = fetch_json_rows(&mut conn, &sql, &statement.params).await?;
                Ok(DriverOutput::Written {
                    affected_rows: returned.len() as u64,
                    returned,
                })
            }
            StatementKind::Update | StatementKind::Delete => {
                let result = bind_params(sqlx::query(&statement.sql), &statement.params)
                    .execute(&mut *conn)
                    .await?;
                Ok(DriverOutput::Written {
                    affected_rows: result.rows_affected(),
                    returned: Vec::new(),
                })
            }
        }
    }

    async fn close(&self) {
        self.pools.close().await;
    }
}

async fn fetch_json_rows(conn: &mut sqlx::PgConnection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let rows = bind_params(sqlx::query(sql), params).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            let Json(value) = row.try_get::<Json<Value>, _>("row")?;
            Ok(into_row(value))
        })
        .collect()
}

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

/// Bind JSON parameters positionally using the closest native Postgres type. Statements cast
/// parameters of typed columns themselves, so strings go out as text.
fn bind_params<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(f)) => query.bind(f),
                (None, None) => query.bind(n.to_string()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(Json(other)),
        };
    }
    query
}
