//! Active-record style access to one registered table.

use super::eager::{self, EagerLoadPlan};
use crate::db::{Database, ResultEnvelope};
use crate::errors::{Error, Result};
use crate::query::{Conditions, QueryContext, cond};
use crate::schema::TableSchema;
use crate::types::{BooleanOp, Direction, Row, Value};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Outcome of a read: `{"data": ...}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadResult {
    Data { data: Value },
    Error { error: String },
}

impl ReadResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReadResult::Data { .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ReadResult::Data { data } => Some(data),
            ReadResult::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ReadResult::Data { .. } => None,
            ReadResult::Error { error } => Some(error),
        }
    }
}

/// Outcome of a write.
///
/// Serializes as `{"success": true, "id": ..}` for creates (plus `"ids"` when more than one row
/// was inserted), `{"success": true}` for updates and deletes, `{"error": "..."}` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    Created { id: Value, ids: Vec<Value> },
    Success { affected_rows: u64 },
    Error(String),
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, WriteResult::Error(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            WriteResult::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl Serialize for WriteResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            success: Option<bool>,
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            ids: Option<&'a [Value]>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
        }

        let wire = match self {
            WriteResult::Created { id, ids } => Wire {
                success: Some(true),
                id: Some(id),
                ids: (ids.len() > 1).then_some(ids.as_slice()),
                error: None,
            },
            WriteResult::Success { .. } => Wire {
                success: Some(true),
                id: None,
                ids: None,
                error: None,
            },
            WriteResult::Error(e) => Wire {
                success: None,
                id: None,
                ids: None,
                error: Some(e),
            },
        };
        wire.serialize(serializer)
    }
}

/// A registered table plus the gateway used to reach it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Model {
    db: Database,
    schema: Arc<TableSchema>,
}

impl Model {
    pub(crate) fn new(db: Database, table: &str) -> Result<Self> {
        let schema = db.registry().schema(table)?;
        Ok(Self { db, schema })
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn table(&self) -> &str {
        self.schema.name()
    }

    /// Start a fluent chain with its own query context.
    pub fn query(&self) -> ModelQuery {
        ModelQuery {
            model: self.clone(),
            context: QueryContext::new(self.schema.clone()),
            plan: EagerLoadPlan::default(),
            error: None,
            cancel: None,
        }
    }

    pub fn select<I>(&self, columns: I) -> ModelQuery
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.query().select(columns)
    }

    pub fn where_(&self, conditions: impl Into<Conditions>) -> ModelQuery {
        self.query().where_(conditions)
    }

    pub fn and_where(&self, conditions: impl Into<Conditions>) -> ModelQuery {
        self.query().and_where(conditions)
    }

    pub fn or_where(&self, conditions: impl Into<Conditions>) -> ModelQuery {
        self.query().or_where(conditions)
    }

    pub fn where_not(&self, conditions: impl Into<Conditions>, op: BooleanOp) -> ModelQuery {
        self.query().where_not(conditions, op)
    }

    pub fn where_in<I>(&self, column: impl Into<String>, values: I) -> ModelQuery
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.query().where_in(column, values)
    }

    pub fn group_by(&self, column: impl Into<String>) -> ModelQuery {
        self.query().group_by(column)
    }

    pub fn having(&self, conditions: impl Into<Conditions>) -> ModelQuery {
        self.query().having(conditions)
    }

    pub fn order_by(&self, column: impl Into<String>, direction: Direction) -> ModelQuery {
        self.query().order_by(column, direction)
    }

    pub fn limit(&self, limit: u64) -> ModelQuery {
        self.query().limit(limit)
    }

    pub fn offset(&self, offset: u64) -> ModelQuery {
        self.query().offset(offset)
    }

    pub fn min(&self, column: impl Into<String>, alias: Option<&str>) -> ModelQuery {
        self.query().min(column, alias)
    }

    pub fn max(&self, column: impl Into<String>, alias: Option<&str>) -> ModelQuery {
        self.query().max(column, alias)
    }

    pub fn sum(&self, column: impl Into<String>, alias: Option<&str>) -> ModelQuery {
        self.query().sum(column, alias)
    }

    pub fn avg(&self, column: impl Into<String>, alias: Option<&str>) -> ModelQuery {
        self.query().avg(column, alias)
    }

    pub fn count(&self, column: impl Into<String>, alias: Option<&str>) -> ModelQuery {
        self.query().count(column, alias)
    }

    pub fn with<I>(&self, paths: I) -> ModelQuery
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.query().with(paths)
    }

    /// Every row of the table.
    pub async fn all(&self) -> Result<ReadResult> {
        self.query().select(["*"]).get().await
    }

    /// The row whose primary key equals `id`, or `{"data": null}`.
    pub async fn find(&self, id: impl Into<Value>) -> Result<ReadResult> {
        self.query()
            .select(["*"])
            .where_(cond(self.schema.primary_key(), "=", id))
            .first()
            .await
    }

    /// Insert `items` after passing each through the fillable allow-list.
    ///
    /// The column list comes from the first filtered item; every other item must filter down to
    /// the same set of columns. Succeeds only if every item was inserted and every returned key
    /// is set.
    #[instrument(skip_all, fields(table = %self.table(), items = items.len()), err)]
    pub async fn create<T: Serialize>(&self, items: &[T]) -> Result<WriteResult> {
        if items.is_empty() {
            return Err(Error::contract("create called with no items"));
        }

        let mut filtered = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = serde_json::to_value(item)
                .map_err(|e| Error::contract(format!("item {index} cannot be serialized: {e}")))?;
            let Value::Object(row) = value else {
                return Err(Error::contract(format!("item {index} is not an object")));
            };
            filtered.push(self.filter(&row));
        }

        let columns: Vec<String> = filtered[0].keys().cloned().collect();
        if columns.is_empty() {
            return Err(Error::contract("create items contain no fillable columns"));
        }

        let mut rows = Vec::with_capacity(filtered.len());
        for (index, mut row) in filtered.into_iter().enumerate() {
            if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
                return Err(Error::contract(format!(
                    "item {index} does not provide the same fillable columns as the first item"
                )));
            }
            rows.push(columns.iter().map(|c| row.remove(c).unwrap_or(Value::Null)).collect());
        }

        let context = QueryContext::new(self.schema.clone()).insert(columns, rows);
        let envelope = self.db.execute(context).await?;
        Ok(created(envelope, items.len()))
    }

    /// Keep only fillable keys that are present in `value`. Present nulls are kept.
    fn filter(&self, value: &Row) -> Row {
        self.schema
            .fillable()
            .iter()
            .filter_map(|column| value.get(column).map(|v| (column.clone(), v.clone())))
            .collect()
    }
}

fn created(envelope: ResultEnvelope, expected: usize) -> WriteResult {
    if let Some(error) = envelope.error {
        return WriteResult::Error(error);
    }
    let Some(status) = envelope.status else {
        return WriteResult::Error("insert returned no status".to_string());
    };

    let keys_valid = status.inserted_keys.len() == expected && status.inserted_keys.iter().all(is_set_key);
    if status.affected_rows != expected as u64 || !keys_valid {
        warn!(expected, affected_rows = status.affected_rows, "Insert did not report every row");
        return WriteResult::Error(format!(
            "insert affected {} of {} rows",
            status.affected_rows, expected
        ));
    }

    let ids = status.inserted_keys;
    let id = ids.first().cloned().unwrap_or(Value::Null);
    WriteResult::Created { id, ids }
}

fn is_set_key(key: &Value) -> bool {
    match key {
        Value::Null => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// One fluent chain against a model.
///
/// Owns its query context and eager-load plan; both are consumed by the terminal call. Errors
/// raised while chaining (an unknown relation in [`with`](Self::with)) are held and returned by
/// the terminal call.
#[derive(Debug)]
pub struct ModelQuery {
    model: Model,
    context: QueryContext,
    plan: EagerLoadPlan,
    error: Option<Error>,
    cancel: Option<CancellationToken>,
}

impl ModelQuery {
    fn map(mut self, f: impl FnOnce(QueryContext) -> QueryContext) -> Self {
        self.context = f(self.context);
        self
    }

    pub fn select<I>(self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.map(|c| c.select(columns))
    }

    pub fn where_(self, conditions: impl Into<Conditions>) -> Self {
        self.map(|c| c.where_(conditions))
    }

    pub fn and_where(self, conditions: impl Into<Conditions>) -> Self {
        self.map(|c| c.and_where(conditions))
    }

    pub fn or_where(self, conditions: impl Into<Conditions>) -> Self {
        self.map(|c| c.or_where(conditions))
    }

    pub fn where_not(self, conditions: impl Into<Conditions>, op: BooleanOp) -> Self {
        self.map(|c| c.where_not(conditions, op))
    }

    pub fn where_in<I>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.map(|c| c.where_in(column, values))
    }

    pub fn group_by(self, column: impl Into<String>) -> Self {
        self.map(|c| c.group_by(column))
    }

    pub fn having(self, conditions: impl Into<Conditions>) -> Self {
        self.map(|c| c.having(conditions))
    }

    pub fn order_by(self, column: impl Into<String>, direction: Direction) -> Self {
        self.map(|c| c.order_by(column, direction))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.map(|c| c.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.map(|c| c.offset(offset))
    }

    pub fn min(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.map(|c| c.min(column, alias))
    }

    pub fn max(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.map(|c| c.max(column, alias))
    }

    pub fn sum(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.map(|c| c.sum(column, alias))
    }

    pub fn avg(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.map(|c| c.avg(column, alias))
    }

    pub fn count(self, column: impl Into<String>, alias: Option<&str>) -> Self {
        self.map(|c| c.count(column, alias))
    }

    /// Eager-load the given dot-separated relation paths with the next read.
    pub fn with<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for path in paths {
            if self.error.is_some() {
                break;
            }
            if let Err(e) = self.plan.register(self.model.db.registry(), self.model.table(), path.as_ref()) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Abort the terminal call's dispatch when `token` fires.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn plan(&self) -> &EagerLoadPlan {
        &self.plan
    }

    /// Drop the chain without executing it.
    pub fn discard(self) {
        self.context.discard();
    }

    /// Execute the accumulated read and materialise the eager-load plan.
    #[instrument(skip_all, fields(table = %self.model.table(), relations = self.plan.len()), err)]
    pub async fn get(self) -> Result<ReadResult> {
        let (model, mut context, plan, cancel) = self.into_parts()?;
        if context.is_write() {
            return Err(Error::contract("get called on a chain carrying a write"));
        }

        // Root relations are matched on parent keys, which a narrow projection may leave out
        let mut added = Vec::new();
        if !plan.is_empty() {
            if context.is_aggregate() {
                context.discard();
                return Err(Error::compile("eager loading cannot be combined with aggregates or group_by"));
            }
            for node in plan.children(None) {
                let key = node.descriptor.parent_key();
                if context.ensure_column(key) {
                    added.push(key.to_string());
                }
            }
        }

        let envelope = model.db.execute_with(context, &cancel).await?;
        if let Some(error) = envelope.error {
            return Ok(ReadResult::Error { error });
        }
        let mut rows = envelope.into_rows().unwrap_or_default();

        if !plan.is_empty() && !rows.is_empty() {
            if let Err(error) = eager::load(&model.db, &plan, None, &mut rows, &cancel).await? {
                return Ok(ReadResult::Error { error });
            }
        }
        for row in &mut rows {
            for key in &added {
                row.shift_remove(key);
            }
        }

        debug!(rows = rows.len(), "Read materialised");
        Ok(ReadResult::Data {
            data: Value::Array(rows.into_iter().map(Value::Object).collect()),
        })
    }

    /// Like [`get`](Self::get) with `limit 1`, returning the row itself or `null`.
    pub async fn first(self) -> Result<ReadResult> {
        Ok(match self.limit(1).get().await? {
            ReadResult::Data { data: Value::Array(mut rows) } if !rows.is_empty() => ReadResult::Data { data: rows.swap_remove(0) },
            ReadResult::Data { .. } => ReadResult::Data { data: Value::Null },
            error => error,
        })
    }

    /// Update matched rows with the fillable subset of `value`. Requires a condition.
    pub async fn update<T: Serialize>(self, value: &T) -> Result<WriteResult> {
        self.write_update(value, false).await
    }

    /// Update every row of the table.
    pub async fn update_all<T: Serialize>(self, value: &T) -> Result<WriteResult> {
        self.write_update(value, true).await
    }

    /// Delete matched rows. Requires a condition.
    pub async fn delete(self) -> Result<WriteResult> {
        self.write_delete(false).await
    }

    /// Delete every row of the table.
    pub async fn delete_all(self) -> Result<WriteResult> {
        self.write_delete(true).await
    }

    async fn write_update<T: Serialize>(self, value: &T, all_rows: bool) -> Result<WriteResult> {
        let Value::Object(row) =
            serde_json::to_value(value).map_err(|e| Error::contract(format!("update value cannot be serialized: {e}")))?
        else {
            return Err(Error::contract("update value is not an object"));
        };
        let values = self.model.filter(&row);
        if values.is_empty() {
            return Err(Error::contract("update value contains no fillable columns"));
        }
        self.write(all_rows, |c| c.update(values)).await
    }

    async fn write_delete(self, all_rows: bool) -> Result<WriteResult> {
        self.write(all_rows, QueryContext::delete).await
    }

    #[instrument(skip_all, fields(table = %self.model.table(), all_rows = all_rows), err)]
    async fn write(self, all_rows: bool, payload: impl FnOnce(QueryContext) -> QueryContext) -> Result<WriteResult> {
        let (model, context, _, cancel) = self.into_parts()?;
        let context = payload(context);
        let context = if all_rows { context.affect_all_rows() } else { context };

        let envelope = model.db.execute_with(context, &cancel).await?;
        if let Some(error) = envelope.error {
            return Ok(WriteResult::Error(error));
        }
        let affected_rows = envelope.status.map_or(0, |s| s.affected_rows);
        if affected_rows == 0 {
            return Ok(WriteResult::Error("no rows affected".to_string()));
        }
        Ok(WriteResult::Success { affected_rows })
    }

    fn into_parts(self) -> Result<(Model, QueryContext, EagerLoadPlan, CancellationToken)> {
        if let Some(error) = self.error {
            self.context.discard();
            return Err(error);
        }
        Ok((self.model, self.context, self.plan, self.cancel.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockDriver, sample_database};
    use serde_json::json;

    fn row(value: Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_filter_keeps_only_present_fillable_keys() {
        let (db, _) = sample_database();
        let users = db.model("users").unwrap();

        let input = row(json!({"id": 9, "name": "A", "email": null, "role": "admin", "extra": 1}));
        let filtered = users.filter(&input);

        assert_eq!(Value::Object(filtered.clone()), json!({"name": "A", "email": null}));
        assert!(filtered.keys().all(|k| users.schema().is_fillable(k)));
        // Input untouched
        assert_eq!(input.len(), 5);
    }

    #[test]
    fn test_filter_output_is_always_fillable_subset() {
        let (db, _) = sample_database();
        let users = db.model("users").unwrap();
        let keys = ["id", "name", "email", "password", "age", "role", "extra", ""];

        for mask in 0u32..(1 << keys.len()) {
            let input: Row = keys
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| (k.to_string(), json!(mask)))
                .collect();
            let filtered = users.filter(&input);
            assert!(filtered.keys().all(|k| users.schema().is_fillable(k) && input.contains_key(k)));
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_create_drops_unfillable_fields() {
        let (db, driver) = sample_database();
        driver.push_written(1, vec![json!({"id": 7})]);

        let result = db
            .model("users")
            .unwrap()
            .create(&[json!({"name": "A", "email": "a@x.com", "password": "p", "extra": "x"})])
            .await
            .unwrap();

        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"success": true, "id": 7}));
        let statements = driver.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            "INSERT INTO \"users\" (\"name\", \"email\", \"password\") VALUES ($1, $2, $3) RETURNING \"id\""
        );
        assert_eq!(statements[0].params, vec![json!("A"), json!("a@x.com"), json!("p")]);
    }

    #[test_log::test(tokio::test)]
    async fn test_create_multiple_rows() {
        let (db, driver) = sample_database();
        driver.push_written(2, vec![json!({"id": 7}), json!({"id": 8})]);

        let result = db
            .model("users")
            .unwrap()
            .create(&[json!({"name": "A", "email": "a@x.com"}), json!({"email": "b@x.com", "name": "B"})])
            .await
            .unwrap();

        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"success": true, "id": 7, "ids": [7, 8]}));
        assert_eq!(driver.statements()[0].params, vec![json!("A"), json!("a@x.com"), json!("B"), json!("b@x.com")]);
    }

    #[test_log::test(tokio::test)]
    async fn test_create_partial_insert_is_an_error() {
        let (db, driver) = sample_database();
        driver.push_written(1, vec![json!({"id": 7})]);

        let result = db
            .model("users")
            .unwrap()
            .create(&[json!({"name": "A"}), json!({"name": "B"})])
            .await
            .unwrap();
        assert_eq!(result.error(), Some("insert affected 1 of 2 rows"));
    }

    #[test_log::test(tokio::test)]
    async fn test_create_contract_violations() {
        let (db, driver) = sample_database();
        let users = db.model("users").unwrap();

        let empty: [Value; 0] = [];
        assert!(matches!(users.create(&empty).await, Err(Error::ContractViolation { .. })));
        assert!(matches!(users.create(&[json!({"extra": 1})]).await, Err(Error::ContractViolation { .. })));
        assert!(matches!(users.create(&[json!(42)]).await, Err(Error::ContractViolation { .. })));
        assert!(matches!(
            users.create(&[json!({"name": "A"}), json!({"email": "b@x.com"})]).await,
            Err(Error::ContractViolation { .. })
        ));
        assert!(driver.statements().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_update_scoped_by_where() {
        let (db, driver) = sample_database();
        driver.push_written(1, Vec::new());

        let result = db
            .model("users")
            .unwrap()
            .where_(vec![cond("id", "=", 1)])
            .update(&json!({"name": "B", "role": "admin"}))
            .await
            .unwrap();

        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"success": true}));
        let statement = &driver.statements()[0];
        assert_eq!(statement.sql, "UPDATE \"users\" SET \"name\" = $1 WHERE \"users\".\"id\" = $2");
        assert_eq!(statement.params, vec![json!("B"), json!(1)]);
    }

    #[test_log::test(tokio::test)]
    async fn test_write_affecting_nothing_is_an_error() {
        let (db, driver) = sample_database();
        driver.push_written(0, Vec::new());

        let result = db.model("users").unwrap().where_(cond("id", "=", 404)).delete().await.unwrap();
        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"error": "no rows affected"}));
    }

    #[test_log::test(tokio::test)]
    async fn test_unscoped_delete_rejected() {
        let (db, driver) = sample_database();

        let result = db.model("users").unwrap().query().delete().await;
        assert!(matches!(result, Err(Error::ContractViolation { .. })));
        assert!(driver.statements().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_all_opts_in() {
        let (db, driver) = sample_database();
        driver.push_written(12, Vec::new());

        let result = db.model("comments").unwrap().query().delete_all().await.unwrap();
        assert_eq!(result, WriteResult::Success { affected_rows: 12 });
        assert_eq!(driver.statements()[0].sql, "DELETE FROM \"comments\"");
    }

    #[test_log::test(tokio::test)]
    async fn test_find_returns_single_row_or_null() {
        let (db, driver) = sample_database();
        driver.push_rows(vec![json!({"id": 1, "name": "A"})]);
        driver.push_rows(Vec::new());
        let users = db.model("users").unwrap();

        assert_eq!(users.find(1).await.unwrap().data(), Some(&json!({"id": 1, "name": "A"})));
        assert_eq!(users.find(2).await.unwrap().data(), Some(&Value::Null));
        assert!(driver.statements()[0].sql.ends_with("WHERE \"users\".\"id\" = $1 LIMIT 1"));
    }

    #[test_log::test(tokio::test)]
    async fn test_shared_eager_node_fetched_once() {
        let (db, driver) = sample_database();
        driver.push_rows(vec![json!({"id": 1, "name": "A"}), json!({"id": 2, "name": "B"})]);
        driver.push_rows(vec![json!({"id": 10, "user_id": 1, "title": "T"})]);
        driver.push_rows(vec![json!({"id": 1, "name": "A"})]);
        driver.push_rows(vec![
            json!({"id": 100, "post_id": 10, "user_id": 2, "body": "x"}),
            json!({"id": 101, "post_id": 10, "user_id": 1, "body": "y"}),
        ]);

        let result = db
            .model("users")
            .unwrap()
            .with(["posts.comments", "posts.author"])
            .select(["*"])
            .get()
            .await
            .unwrap();

        let statements = driver.statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[1].sql.contains("\"posts\".\"user_id\" IN ($1, $2)"));
        assert!(statements[2].sql.starts_with("SELECT") && statements[2].sql.contains("FROM \"users\""));
        assert!(statements[3].sql.contains("\"comments\".\"post_id\" IN ($1)"));

        let data = result.data().unwrap();
        assert_eq!(data[0]["posts"][0]["author"]["name"], json!("A"));
        assert_eq!(data[0]["posts"][0]["comments"].as_array().unwrap().len(), 2);
        assert_eq!(data[1]["posts"], json!([]));
    }

    #[test_log::test(tokio::test)]
    async fn test_eager_failure_surfaces_as_error() {
        let (db, driver) = sample_database();
        driver.push_rows(vec![json!({"id": 1})]);
        driver.push_error("relation \"profiles\" does not exist");

        let result = db.model("users").unwrap().with(["profile"]).get().await.unwrap();
        assert_eq!(result.error(), Some("relation \"profiles\" does not exist"));
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_relation_deferred_to_get() {
        let (db, driver) = sample_database();

        let result = db.model("users").unwrap().with(["followers"]).get().await;
        assert!(matches!(result, Err(Error::UnknownRelation { .. })));
        assert!(driver.statements().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_overlapping_chains_are_isolated() {
        let (db, driver) = sample_database();
        driver.push_rows(Vec::new());
        driver.push_rows(Vec::new());
        let users = db.model("users").unwrap();

        let adults = users.where_(cond("age", ">", 18));
        let admins = users.where_(cond("role", "=", "admin"));
        admins.get().await.unwrap();
        adults.get().await.unwrap();

        let statements = driver.statements();
        assert_eq!(statements[0].params, vec![json!("admin")]);
        assert_eq!(statements[1].params, vec![json!(18)]);
    }

    #[test_log::test(tokio::test)]
    async fn test_cancelled_chain() {
        let driver = std::sync::Arc::new(MockDriver::new().with_delay(std::time::Duration::from_secs(60)));
        driver.push_rows(Vec::new());
        let db = Database::new(std::sync::Arc::new(crate::test_utils::sample_registry()), driver);

        let token = CancellationToken::new();
        let chain = db.model("users").unwrap().query().cancel_on(token.clone());
        token.cancel();
        assert_eq!(chain.get().await.unwrap().error(), Some("Statement cancelled"));
    }

    #[test_log::test(tokio::test)]
    async fn test_narrow_projection_still_stitches_relations() {
        let (db, driver) = sample_database();
        driver.push_rows(vec![json!({"name": "A", "id": 1}), json!({"name": "B", "id": 2})]);
        driver.push_rows(vec![json!({"id": 10, "user_id": 2, "title": "T"})]);

        let result = db
            .model("users")
            .unwrap()
            .select(["name"])
            .with(["posts"])
            .get()
            .await
            .unwrap();

        let statements = driver.statements();
        assert!(statements[0].sql.starts_with("SELECT \"users\".\"name\", \"users\".\"id\" FROM"));
        assert_eq!(statements[1].params, vec![json!(1), json!(2)]);
        assert_eq!(
            result.data(),
            Some(&json!([
                {"name": "A", "posts": []},
                {"name": "B", "posts": [{"id": 10, "user_id": 2, "title": "T"}]},
            ]))
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_projected_key_is_kept() {
        let (db, driver) = sample_database();
        driver.push_rows(vec![json!({"id": 1})]);

        let result = db.model("users").unwrap().select(["users.id"]).with(["profile"]).get().await.unwrap();
        assert!(driver.statements()[0].sql.starts_with("SELECT \"users\".\"id\" FROM"));
        assert_eq!(result.data().unwrap()[0]["id"], json!(1));
    }

    #[test_log::test(tokio::test)]
    async fn test_eager_loading_rejects_aggregates() {
        let (db, driver) = sample_database();

        let result = db.model("users").unwrap().count("id", Some("n")).group_by("role").with(["posts"]).get().await;
        assert!(matches!(result, Err(Error::QueryCompile { .. })));
        assert!(driver.statements().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_model_starts_chains_from_any_clause() {
        let (db, driver) = sample_database();
        let users = db.model("users").unwrap();

        users.where_in("id", [1, 2]).get().await.unwrap();
        users.order_by("name", Direction::Asc).limit(2).offset(4).get().await.unwrap();
        users.count("id", Some("n")).group_by("role").having(cond("n", ">", 1)).get().await.unwrap();
        users.or_where(cond("age", "<", 18)).and_where(cond("role", "=", "guest")).get().await.unwrap();
        users.where_not(cond("role", "=", "admin"), BooleanOp::And).get().await.unwrap();
        users.max("age", None).get().await.unwrap();

        let statements = driver.statements();
        assert!(statements[0].sql.ends_with("WHERE \"users\".\"id\" IN ($1, $2)"));
        assert!(statements[1].sql.ends_with("ORDER BY \"users\".\"name\" ASC LIMIT 2 OFFSET 4"));
        assert!(statements[2].sql.contains("HAVING COUNT(\"users\".\"id\") > $1"));
        assert_eq!(statements[3].params, vec![json!(18), json!("guest")]);
        assert!(statements[4].sql.ends_with("WHERE NOT (\"users\".\"role\" = $1)"));
        assert!(statements[5].sql.starts_with("SELECT MAX(\"users\".\"age\") FROM"));
    }
}
