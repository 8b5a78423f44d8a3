//! Query construction.
//!
//! A [`QueryContext`] accumulates the clauses of exactly one pending statement against one table:
//! projection, condition tree, grouping, having, ordering, limit/offset, aggregates, or a pending
//! write payload. Accumulation is synchronous and purely in memory; nothing touches the database
//! until the context is handed to [`crate::db::Database::execute`], which consumes it.
//!
//! Each fluent chain owns its own context value, so overlapping chains against the same table
//! cannot observe each other's clauses.
//!
//! ```
//! use quarry::query::{cond, QueryContext};
//! use quarry::{Direction, Registry};
//!
//! let registry = Registry::builder()
//!     .init("users", ["id", "name", "age"], "id", ["name", "age"])
//!     .build()
//!     .unwrap();
//!
//! let statement = QueryContext::new(registry.schema("users").unwrap())
//!     .select(["*"])
//!     .where_(vec![cond("age", ">", 18)])
//!     .order_by("name", Direction::Desc)
//!     .limit(10)
//!     .compile()
//!     .unwrap();
//!
//! assert_eq!(statement.params, vec![serde_json::json!(18)]);
//! ```

mod compile;
mod condition;

pub use compile::Statement;
pub use condition::{Condition, ConditionBuilder, ConditionNode, Conditions, cond};

use crate::schema::TableSchema;
use crate::types::{AggregateFn, BooleanOp, Direction, Row, Value};
use std::sync::Arc;
use tracing::trace;

/// One aggregate projection, `FN(column) [AS alias]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: AggregateFn,
    pub column: String,
    pub alias: Option<String>,
}

/// One `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// A pending write.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    /// Bulk insert; each row positionally matches `columns`.
    Insert { columns: Vec<String>, rows: Vec<Vec<Value>> },
    Update { values: Row },
    Delete,
}

/// Mutable accumulation of one pending statement.
#[derive(Debug, Clone)]
pub struct QueryContext {
    schema: Arc<TableSchema>,
    columns: Vec<String>,
    aggregates: Vec<Aggregate>,
    conditions: ConditionBuilder,
    group_by: Vec<String>,
    having: ConditionBuilder,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    write: Option<WritePayload>,
    affect_all: bool,
}

impl QueryContext {
    /// Open a fresh context scoped to `schema`'s table.
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            columns: Vec::new(),
            aggregates: Vec::new(),
            conditions: ConditionBuilder::default(),
            group_by: Vec::new(),
            having: ConditionBuilder::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            write: None,
            affect_all: false,
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn table(&self) -> &str {
        self.schema.name()
    }

    /// Add projected columns. `"*"` expands to every declared column; repeated columns are kept
    /// once, in first-seen order.
    pub fn select<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for column in columns {
            let column = column.as_ref();
            if column == "*" {
                let all = self.schema.columns().to_vec();
                all.into_iter().for_each(|c| self.push_column(c));
            } else {
                self.push_column(column.to_string());
            }
        }
        self
    }

    pub fn where_(mut self, conditions: impl Into<Conditions>) -> Self {
        self.conditions.where_(conditions);
        self
    }

    pub fn and_where(mut self, conditions: impl Into<Conditions>) -> Self {
        self.conditions.and_where(conditions);
        self
    }

    pub fn or_where(mut self, conditions: impl Into<Conditions>) -> Self {
        self.conditions.or_where(conditions);
        self
    }

    pub fn where_not(mut self, conditions: impl Into<Conditions>, op: BooleanOp) -> Self {
        self.conditions.where_not(conditions, op);
        self
    }

    /// `column IN (values...)`, ANDed with prior predicates.
    pub fn where_in<I>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.where_(cond(column, "IN", Value::Array(values)))
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.group_by.contains(&column) {
            self.group_by.push(column);
        }
        self
    }

    pub fn having(mut self, conditions: impl Into<Conditions>) -> Self {
        self.having.where_(conditions);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn aggregate(mut self, function: AggregateFn, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregates.push(Aggregate {
            function,
            column: column.into(),
            alias: alias.map(str::to_string),
        });
        self
    }

    pub fn min(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregate(AggregateFn::Min, column, alias)
    }

    pub fn max(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregate(AggregateFn::Max, column, alias)
    }

    pub fn sum(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregate(AggregateFn::Sum, column, alias)
    }

    pub fn avg(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregate(AggregateFn::Avg, column, alias)
    }

    pub fn count(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.aggregate(AggregateFn::Count, column, alias)
    }

    /// Turn the context into a bulk insert.
    pub fn insert<C>(mut self, columns: C, rows: Vec<Vec<Value>>) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        self.write = Some(WritePayload::Insert {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        });
        self
    }

    /// Turn the context into an update of the rows matched by the condition tree.
    pub fn update(mut self, values: Row) -> Self {
        self.write = Some(WritePayload::Update { values });
        self
    }

    /// Turn the context into a delete of the rows matched by the condition tree.
    pub fn delete(mut self) -> Self {
        self.write = Some(WritePayload::Delete);
        self
    }

    /// Explicit opt-in allowing an update or delete without any condition.
    pub fn affect_all_rows(mut self) -> Self {
        self.affect_all = true;
        self
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn is_write(&self) -> bool {
        self.write.is_some()
    }

    /// Whether the projection is grouped or aggregated rather than one row per table row.
    pub fn is_aggregate(&self) -> bool {
        !self.aggregates.is_empty() || !self.group_by.is_empty()
    }

    /// Project `column` when an explicit projection leaves it out. Returns whether it was added.
    pub(crate) fn ensure_column(&mut self, column: &str) -> bool {
        let table = self.schema.name();
        let projected = self.columns.is_empty()
            || self.columns.iter().any(|c| {
                c == column || c.strip_prefix(table).and_then(|rest| rest.strip_prefix('.')) == Some(column)
            });
        if projected {
            return false;
        }
        self.columns.push(column.to_string());
        true
    }

    /// Drop the accumulated clauses without executing them.
    pub fn discard(self) {
        trace!(table = %self.schema.name(), "Query context discarded");
    }

    fn push_column(&mut self, column: String) {
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
    }
}
