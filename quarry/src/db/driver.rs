//! The storage-driver seam.

use super::errors::Result;
use crate::query::Statement;
use crate::types::Row;
use async_trait::async_trait;

/// What a driver hands back for one dispatched statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutput {
    /// Rows produced by a `SELECT`.
    Rows(Vec<Row>),
    /// Outcome of an `INSERT`, `UPDATE` or `DELETE`. `returned` holds the `RETURNING` rows of an
    /// insert (its primary keys) and is empty otherwise.
    Written { affected_rows: u64, returned: Vec<Row> },
}

/// External storage driver executing compiled statements.
///
/// Implementations own connection management: a connection is borrowed for the duration of one
/// `dispatch` call and must be released on every exit path, including when the returned future
/// is dropped mid-flight (cancellation or timeout).
#[async_trait]
pub trait Driver: Send + Sync {
    async fn dispatch(&self, statement: &Statement) -> Result<DriverOutput>;

    /// Release pooled resources on shutdown.
    async fn close(&self) {}
}
