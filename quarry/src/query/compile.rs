//! Deterministic translation of a [`QueryContext`] into statement text plus positional
//! parameters.
//!
//! The same clause sequence always yields byte-identical text and the same parameter order:
//! parameters are numbered in the order their clauses are rendered (SET values, then WHERE
//! leaves left to right, then HAVING leaves). Identifiers are double-quoted and every column
//! reference outside of write target lists is qualified by its table. `NULL` is rendered as a
//! literal and never bound; values for columns with a declared type carry a `::type` cast.

use super::{Aggregate, ConditionNode, QueryContext, WritePayload};
use crate::errors::{Error, Result};
use crate::types::{AggregateFn, BooleanOp, Operator, StatementKind, Value};
use serde::Serialize;

/// A compiled, parameterized statement ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub sql: String,
    pub params: Vec<Value>,
    /// Sort keys over the output row names, e.g. `"name" DESC`; drivers that reshape rows
    /// re-apply them outside the statement.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ordering: Vec<String>,
    /// Projected columns that exist only to sort by and are not part of the result rows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hidden: Vec<String>,
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// How a reference to an aggregate alias is resolved.
#[derive(Clone, Copy, PartialEq)]
enum Alias {
    Reject,
    /// The aggregate expression itself (HAVING runs before the projection is named).
    Expression,
    /// The quoted alias (ORDER BY).
    Name,
}

struct Compiler<'a> {
    ctx: &'a QueryContext,
    params: Vec<Value>,
    ordering: Vec<String>,
    hidden: Vec<String>,
}

impl QueryContext {
    /// Compile the accumulated clauses.
    ///
    /// Fails with [`Error::QueryCompile`] for structurally invalid combinations (unknown column or
    /// operator, `having` without `group_by`, limits on writes, ragged insert rows) and with
    /// [`Error::ContractViolation`] for an update or delete that has no condition and was not
    /// opted into affecting every row.
    pub fn compile(&self) -> Result<Statement> {
        let mut compiler = Compiler {
            ctx: self,
            params: Vec::new(),
            ordering: Vec::new(),
            hidden: Vec::new(),
        };
        let (kind, sql) = match &self.write {
            None => (StatementKind::Select, compiler.select()?),
            Some(WritePayload::Insert { columns, rows }) => (StatementKind::Insert, compiler.insert(columns, rows)?),
            Some(WritePayload::Update { values }) => (StatementKind::Update, compiler.update(values)?),
            Some(WritePayload::Delete) => (StatementKind::Delete, compiler.delete()?),
        };
        Ok(Statement {
            kind,
            table: self.table().to_string(),
            sql,
            params: compiler.params,
            ordering: compiler.ordering,
            hidden: compiler.hidden,
        })
    }
}

impl<'a> Compiler<'a> {
    fn table(&self) -> String {
        quote(self.ctx.table())
    }

    fn select(&mut self) -> Result<String> {
        let ctx = self.ctx;
        let mut projection = ctx
            .columns
            .iter()
            .map(|c| self.column(c, Alias::Reject))
            .collect::<Result<Vec<_>>>()?;
        for aggregate in &ctx.aggregates {
            projection.push(self.aggregate(aggregate)?);
        }
        let all_columns = projection.is_empty();
        if all_columns {
            let table = self.table();
            projection = ctx
                .schema
                .columns()
                .iter()
                .map(|c| format!("{table}.{}", quote(c)))
                .collect();
        }

        let mut entries = Vec::with_capacity(ctx.order_by.len());
        for (index, order) in ctx.order_by.iter().enumerate() {
            let expression = self.column(&order.column, Alias::Name)?;
            entries.push(format!("{expression} {}", order.direction.as_sql()));
            let key = match self.output_name(&order.column, all_columns) {
                Some(name) => name,
                None => {
                    let name = format!("__order_{index}");
                    projection.push(format!("{expression} AS {}", quote(&name)));
                    self.hidden.push(name.clone());
                    name
                }
            };
            self.ordering.push(format!("{} {}", quote(&key), order.direction.as_sql()));
        }

        let mut sql = format!("SELECT {} FROM {}", projection.join(", "), self.table());

        if let Some(root) = ctx.conditions.root() {
            let rendered = self.condition(root, false, Alias::Reject)?;
            sql.push_str(" WHERE ");
            sql.push_str(&rendered);
        }

        if !ctx.group_by.is_empty() {
            let columns = ctx
                .group_by
                .iter()
                .map(|c| self.column(c, Alias::Reject))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        if let Some(root) = ctx.having.root() {
            if ctx.group_by.is_empty() {
                return Err(Error::compile("having requires a group_by clause"));
            }
            let rendered = self.condition(root, false, Alias::Expression)?;
            sql.push_str(" HAVING ");
            sql.push_str(&rendered);
        }

        if !entries.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&entries.join(", "));
        }

        if let Some(limit) = ctx.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = ctx.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(sql)
    }

    fn insert(&mut self, columns: &[String], rows: &[Vec<Value>]) -> Result<String> {
        self.reject_read_clauses("insert")?;
        if self.ctx.conditions.root().is_some() {
            return Err(Error::compile("insert cannot carry where conditions"));
        }
        if columns.is_empty() {
            return Err(Error::compile("insert requires at least one column"));
        }
        if rows.is_empty() {
            return Err(Error::compile("insert requires at least one row"));
        }
        let targets = columns.iter().map(|c| self.target(c)).collect::<Result<Vec<_>>>()?;

        let mut tuples = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::compile(format!(
                    "insert row {index} has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            let placeholders = columns
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    let sql_type = self.column_type(column);
                    self.bind_typed(value.clone(), sql_type)
                })
                .collect::<Vec<_>>();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        Ok(format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING {}",
            self.table(),
            targets.join(", "),
            tuples.join(", "),
            quote(self.ctx.schema.primary_key())
        ))
    }

    fn update(&mut self, values: &crate::types::Row) -> Result<String> {
        self.reject_read_clauses("update")?;
        self.require_scope("update")?;
        if values.is_empty() {
            return Err(Error::compile("update requires at least one value"));
        }
        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            let target = self.target(column)?;
            let sql_type = self.column_type(column);
            let placeholder = self.bind_typed(value.clone(), sql_type);
            assignments.push(format!("{target} = {placeholder}"));
        }
        let mut sql = format!("UPDATE {} SET {}", self.table(), assignments.join(", "));
        self.push_where(&mut sql)?;
        Ok(sql)
    }

    fn delete(&mut self) -> Result<String> {
        self.reject_read_clauses("delete")?;
        self.require_scope("delete")?;
        let mut sql = format!("DELETE FROM {}", self.table());
        self.push_where(&mut sql)?;
        Ok(sql)
    }

    fn push_where(&mut self, sql: &mut String) -> Result<()> {
        if let Some(root) = self.ctx.conditions.root() {
            let rendered = self.condition(root, false, Alias::Reject)?;
            sql.push_str(" WHERE ");
            sql.push_str(&rendered);
        }
        Ok(())
    }

    fn require_scope(&self, operation: &str) -> Result<()> {
        if self.ctx.conditions.is_empty() && !self.ctx.affect_all {
            return Err(Error::contract(format!(
                "{operation} on '{}' has no where condition; opt in explicitly to affect every row",
                self.ctx.table()
            )));
        }
        Ok(())
    }

    fn reject_read_clauses(&self, operation: &str) -> Result<()> {
        let ctx = self.ctx;
        if ctx.limit.is_some() || ctx.offset.is_some() {
            return Err(Error::compile(format!("{operation} cannot carry limit or offset")));
        }
        if !ctx.group_by.is_empty() || !ctx.having.is_empty() {
            return Err(Error::compile(format!("{operation} cannot carry group_by or having")));
        }
        if !ctx.aggregates.is_empty() || !ctx.order_by.is_empty() {
            return Err(Error::compile(format!("{operation} cannot carry aggregates or order_by")));
        }
        Ok(())
    }

    fn aggregate(&self, aggregate: &Aggregate) -> Result<String> {
        let mut rendered = self.aggregate_expression(aggregate)?;
        if let Some(alias) = &aggregate.alias {
            rendered.push_str(" AS ");
            rendered.push_str(&quote(alias));
        }
        Ok(rendered)
    }

    fn aggregate_expression(&self, aggregate: &Aggregate) -> Result<String> {
        let argument = if aggregate.column == "*" {
            if aggregate.function != AggregateFn::Count {
                return Err(Error::compile(format!("{}(*) is not allowed", aggregate.function.as_sql())));
            }
            "*".to_string()
        } else {
            self.column(&aggregate.column, Alias::Reject)?
        };
        Ok(format!("{}({argument})", aggregate.function.as_sql()))
    }

    fn aliased(&self, raw: &str) -> Option<&'a Aggregate> {
        let ctx = self.ctx;
        ctx.aggregates.iter().find(|a| a.alias.as_deref() == Some(raw))
    }

    /// Name of `raw` in the output rows when it is already projected.
    fn output_name(&self, raw: &str, all_columns: bool) -> Option<String> {
        if self.aliased(raw).is_some() {
            return Some(raw.to_string());
        }
        let column = self.bare(raw);
        let projected = all_columns || self.ctx.columns.iter().any(|c| self.bare(c) == column);
        projected.then(|| column.to_string())
    }

    fn condition(&mut self, node: &ConditionNode, nested: bool, alias: Alias) -> Result<String> {
        match node {
            ConditionNode::Leaf(condition) => {
                let column = self.column(&condition.column, alias)?;
                let operator: Operator = condition.operator.parse().map_err(Error::compile)?;
                let sql_type = match self.aliased(&condition.column) {
                    Some(aggregate) if alias != Alias::Reject => self.aggregate_type(aggregate),
                    _ => self.column_type(&condition.column),
                };
                self.predicate(column, operator, &condition.value, sql_type)
            }
            ConditionNode::Group { op: BooleanOp::Not, children } => {
                let inner = children
                    .iter()
                    .map(|c| self.condition(c, false, alias))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("NOT ({})", inner.join(" AND ")))
            }
            ConditionNode::Group { op, children } => {
                let parts = children
                    .iter()
                    .map(|c| self.condition(c, true, alias))
                    .collect::<Result<Vec<_>>>()?;
                let joined = parts.join(&format!(" {} ", op.as_sql()));
                if nested && parts.len() > 1 {
                    Ok(format!("({joined})"))
                } else {
                    Ok(joined)
                }
            }
        }
    }

    fn predicate(&mut self, column: String, operator: Operator, value: &Value, sql_type: Option<&str>) -> Result<String> {
        match operator {
            Operator::In | Operator::NotIn => {
                let Value::Array(values) = value else {
                    return Err(Error::compile(format!("{} expects a list of values", operator.as_sql())));
                };
                if values.is_empty() {
                    // An empty list matches nothing; its negation matches everything
                    return Ok(if operator == Operator::In { "FALSE" } else { "TRUE" }.to_string());
                }
                let placeholders = values
                    .iter()
                    .map(|v| self.bind_typed(v.clone(), sql_type))
                    .collect::<Vec<_>>();
                Ok(format!("{column} {} ({})", operator.as_sql(), placeholders.join(", ")))
            }
            Operator::Is | Operator::IsNot => {
                let literal = match value {
                    Value::Null => "NULL",
                    Value::Bool(true) => "TRUE",
                    Value::Bool(false) => "FALSE",
                    _ => return Err(Error::compile("IS and IS NOT only compare with null, true or false")),
                };
                Ok(format!("{column} {} {literal}", operator.as_sql()))
            }
            _ => match value {
                Value::Null => Err(Error::compile(format!(
                    "comparing {column} with null using '{}' never matches; use IS or IS NOT",
                    operator.as_sql()
                ))),
                Value::Array(_) | Value::Object(_) => Err(Error::compile(format!(
                    "'{}' expects a scalar value for {column}",
                    operator.as_sql()
                ))),
                scalar => {
                    let placeholder = self.bind_typed(scalar.clone(), sql_type);
                    Ok(format!("{column} {} {placeholder}", operator.as_sql()))
                }
            },
        }
    }

    /// Resolve a column reference to its table-qualified form. Aggregate aliases resolve
    /// according to `alias`.
    fn column(&self, raw: &str, alias: Alias) -> Result<String> {
        let ctx = self.ctx;
        if let Some(aggregate) = self.aliased(raw) {
            match alias {
                Alias::Name => return Ok(quote(raw)),
                Alias::Expression => return self.aggregate_expression(aggregate),
                Alias::Reject => {}
            }
        }
        let column = match raw.split_once('.') {
            Some((table, column)) if table == ctx.table() => column,
            Some((table, _)) => {
                return Err(Error::compile(format!(
                    "column '{raw}' references table '{table}', expected '{}'",
                    ctx.table()
                )));
            }
            None => raw,
        };
        if !ctx.schema.has_column(column) {
            return Err(Error::compile(format!("unknown column '{column}' on table '{}'", ctx.table())));
        }
        Ok(format!("{}.{}", self.table(), quote(column)))
    }

    /// Unqualified target column of an INSERT or SET list.
    fn target(&self, raw: &str) -> Result<String> {
        let column = self.bare(raw);
        if !self.ctx.schema.has_column(column) {
            return Err(Error::compile(format!(
                "unknown column '{column}' on table '{}'",
                self.ctx.table()
            )));
        }
        Ok(quote(column))
    }

    fn bare<'r>(&self, raw: &'r str) -> &'r str {
        raw.strip_prefix(self.ctx.table())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(raw)
    }

    fn column_type(&self, raw: &str) -> Option<&'a str> {
        let ctx = self.ctx;
        ctx.schema.column_type(self.bare(raw))
    }

    /// MIN and MAX keep their argument's type; other aggregates are numeric.
    fn aggregate_type(&self, aggregate: &Aggregate) -> Option<&'a str> {
        match aggregate.function {
            AggregateFn::Min | AggregateFn::Max => self.column_type(&aggregate.column),
            _ => None,
        }
    }

    fn bind_typed(&mut self, value: Value, sql_type: Option<&str>) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        match sql_type {
            Some(sql_type) => format!("${}::{sql_type}", self.params.len()),
            None => format!("${}", self.params.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::Error;
    use crate::query::{Conditions, QueryContext, cond};
    use crate::schema::TableSchema;
    use crate::types::{BooleanOp, Direction, StatementKind};
    use serde_json::{Map, json};
    use std::sync::Arc;

    fn users() -> QueryContext {
        let schema = TableSchema::new(
            "users",
            ["id", "name", "email", "password", "age", "role"],
            "id",
            ["name", "email", "password"],
        )
        .unwrap();
        QueryContext::new(Arc::new(schema))
    }

    #[test]
    fn test_select_where_order_limit() {
        let statement = users()
            .select(["*"])
            .where_(vec![cond("age", ">", 18)])
            .order_by("name", Direction::Desc)
            .limit(10)
            .compile()
            .unwrap();

        assert_eq!(statement.kind, StatementKind::Select);
        assert_eq!(
            statement.sql,
            "SELECT \"users\".\"id\", \"users\".\"name\", \"users\".\"email\", \"users\".\"password\", \
             \"users\".\"age\", \"users\".\"role\" FROM \"users\" WHERE \"users\".\"age\" > $1 \
             ORDER BY \"users\".\"name\" DESC LIMIT 10"
        );
        assert_eq!(statement.params, vec![json!(18)]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let build = || {
            users()
                .select(["name", "email"])
                .where_(vec![cond("age", ">=", 21), cond("role", "=", "admin")])
                .or_where(Conditions::group(|q| {
                    q.where_(cond("name", "LIKE", "a%")).or_where(cond("email", "LIKE", "%@x.com"));
                }))
                .where_not(vec![cond("id", "IN", json!([1, 2]))], BooleanOp::And)
                .order_by("id", Direction::Asc)
        };
        let first = build().compile().unwrap();
        let second = build().compile().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hidden, vec!["__order_0"]);
        assert_eq!(
            first.params,
            vec![json!(21), json!("admin"), json!("a%"), json!("%@x.com"), json!(1), json!(2)]
        );
        assert!(first.sql.contains(
            "WHERE ((\"users\".\"age\" >= $1 AND \"users\".\"role\" = $2) OR (\"users\".\"name\" LIKE $3 OR \
             \"users\".\"email\" LIKE $4)) AND NOT (\"users\".\"id\" IN ($5, $6))"
        ));
    }

    #[test]
    fn test_update_scoped_by_where() {
        let mut values = Map::new();
        values.insert("name".to_string(), json!("B"));
        let statement = users().where_(vec![cond("id", "=", 1)]).update(values).compile().unwrap();

        assert_eq!(statement.kind, StatementKind::Update);
        assert_eq!(statement.sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"users\".\"id\" = $2");
        assert_eq!(statement.params, vec![json!("B"), json!(1)]);
    }

    #[test]
    fn test_unscoped_delete_is_contract_violation() {
        let err = users().delete().compile().unwrap_err();
        assert!(matches!(err, Error::ContractViolation { .. }));

        let statement = users().delete().affect_all_rows().compile().unwrap();
        assert_eq!(statement.sql, "DELETE FROM \"users\"");
    }

    #[test]
    fn test_bulk_insert_returns_primary_key() {
        let statement = users()
            .insert(
                ["name", "email"],
                vec![vec![json!("A"), json!("a@x.com")], vec![json!("B"), json!("b@x.com")]],
            )
            .compile()
            .unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2), ($3, $4) RETURNING \"id\""
        );
        assert_eq!(statement.params.len(), 4);
    }

    #[test]
    fn test_ragged_insert_rejected() {
        let err = users()
            .insert(["name", "email"], vec![vec![json!("A")]])
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::QueryCompile { .. }));
    }

    #[test]
    fn test_having_without_group_by_rejected() {
        let err = users()
            .count("id", Some("total"))
            .having(vec![cond("total", ">", 1)])
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("group_by"));
    }

    #[test]
    fn test_aggregates_group_by_having() {
        let statement = users()
            .select(["role"])
            .count("id", Some("total"))
            .avg("age", None)
            .group_by("role")
            .having(vec![cond("total", ">", 5)])
            .order_by("total", Direction::Desc)
            .compile()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"users\".\"role\", COUNT(\"users\".\"id\") AS \"total\", AVG(\"users\".\"age\") FROM \"users\" \
             GROUP BY \"users\".\"role\" HAVING COUNT(\"users\".\"id\") > $1 ORDER BY \"total\" DESC"
        );
        assert_eq!(statement.ordering, vec!["\"total\" DESC"]);
        assert!(statement.hidden.is_empty());
    }

    #[test]
    fn test_having_alias_inside_or_group() {
        let statement = users()
            .select(["role"])
            .max("age", Some("oldest"))
            .group_by("role")
            .having(Conditions::group(|q| {
                q.where_(cond("oldest", ">", 60)).or_where(cond("role", "=", "admin"));
            }))
            .compile()
            .unwrap();
        assert!(statement.sql.ends_with(
            "HAVING MAX(\"users\".\"age\") > $1 OR \"users\".\"role\" = $2"
        ));
        assert!(!statement.sql.contains("\"oldest\" >"));
    }

    #[test]
    fn test_order_by_unprojected_column_is_hidden() {
        let statement = users()
            .select(["name"])
            .order_by("age", Direction::Desc)
            .order_by("users.name", Direction::Asc)
            .limit(5)
            .compile()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"users\".\"name\", \"users\".\"age\" AS \"__order_0\" FROM \"users\" \
             ORDER BY \"users\".\"age\" DESC, \"users\".\"name\" ASC LIMIT 5"
        );
        assert_eq!(statement.ordering, vec!["\"__order_0\" DESC", "\"name\" ASC"]);
        assert_eq!(statement.hidden, vec!["__order_0"]);

        let all = users().order_by("age", Direction::Asc).compile().unwrap();
        assert_eq!(all.ordering, vec!["\"age\" ASC"]);
        assert!(all.hidden.is_empty());
    }

    #[test]
    fn test_null_values_rendered_as_literals() {
        let statement = users()
            .insert(["name", "email"], vec![vec![json!("A"), json!(null)]])
            .compile()
            .unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, NULL) RETURNING \"id\""
        );
        assert_eq!(statement.params, vec![json!("A")]);

        let mut values = Map::new();
        values.insert("email".to_string(), json!(null));
        let statement = users()
            .where_in("role", vec![json!("admin"), json!(null)])
            .update(values)
            .compile()
            .unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE \"users\" SET \"email\" = NULL WHERE \"users\".\"role\" IN ($1, NULL)"
        );
        assert_eq!(statement.params, vec![json!("admin")]);
    }

    #[test]
    fn test_typed_columns_cast_their_values() {
        let schema = TableSchema::new("orders", ["id", "ref", "placed_at", "total"], "id", ["ref", "placed_at", "total"])
            .unwrap()
            .with_column_types([("ref", "uuid"), ("placed_at", "timestamptz"), ("total", "numeric")])
            .unwrap();
        let orders = || QueryContext::new(Arc::new(schema.clone()));

        let select = orders()
            .where_(vec![cond("placed_at", ">=", "2024-01-01T00:00:00Z")])
            .where_in("ref", vec!["8a5c4a4e-0a5e-4b7a-9d4e-8c0f6a3b2d1e"])
            .compile()
            .unwrap();
        assert!(select.sql.ends_with(
            "WHERE \"orders\".\"placed_at\" >= $1::timestamptz AND \"orders\".\"ref\" IN ($2::uuid)"
        ));

        let insert = orders()
            .insert(["ref", "total"], vec![vec![json!(null), json!("9.50")]])
            .compile()
            .unwrap();
        assert!(insert.sql.contains("VALUES (NULL, $1::numeric)"));

        let having = orders()
            .select(["ref"])
            .max("placed_at", Some("latest"))
            .sum("total", Some("spent"))
            .group_by("ref")
            .having(vec![cond("latest", "<", "2024-06-01"), cond("spent", ">", 100)])
            .compile()
            .unwrap();
        assert!(having.sql.ends_with(
            "HAVING MAX(\"orders\".\"placed_at\") < $1::timestamptz AND SUM(\"orders\".\"total\") > $2"
        ));
    }

    #[test]
    fn test_unknown_column_and_operator_rejected() {
        assert!(users().where_(vec![cond("salary", "=", 1)]).compile().is_err());
        assert!(users().where_(vec![cond("age", "=>", 1)]).compile().is_err());
        assert!(users().where_(vec![cond("posts.id", "=", 1)]).compile().is_err());
    }

    #[test]
    fn test_null_and_in_edge_cases() {
        let statement = users()
            .where_(vec![cond("email", "IS", json!(null))])
            .where_in("id", Vec::<i64>::new())
            .compile()
            .unwrap();
        assert!(statement.sql.ends_with("WHERE \"users\".\"email\" IS NULL AND FALSE"));
        assert!(statement.params.is_empty());

        assert!(users().where_(vec![cond("email", "=", json!(null))]).compile().is_err());
    }

    #[test]
    fn test_qualified_references_accepted() {
        let statement = users().select(["users.name"]).where_(vec![cond("users.id", "=", 3)]).compile().unwrap();
        assert!(statement.sql.starts_with("SELECT \"users\".\"name\" FROM \"users\""));
    }

    #[test]
    fn test_limit_on_write_rejected() {
        let err = users().where_(vec![cond("id", "=", 1)]).limit(1).delete().compile().unwrap_err();
        assert!(matches!(err, Error::QueryCompile { .. }));
    }
}
