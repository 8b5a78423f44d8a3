//! Table metadata bound once at bootstrap.
//!
//! A [`TableSchema`] describes one table: its name, primary key, declared columns and the
//! fillable allow-list used by every write path. Schemas are immutable after construction and are
//! shared behind `Arc` for the lifetime of the process.
//!
//! Relations between tables are declared as plain data ([`RelationDeclaration`]): they name their
//! target model rather than pointing at it, so a cyclic graph (users have posts, posts belong to a
//! user) is just two declarations. The [`Registry`] is the arena that owns every schema and
//! resolves those names on demand.

mod registry;

pub use registry::{Registry, RegistryBuilder};

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_primary_key() -> String {
    "id".to_string()
}

/// Immutable description of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    columns: Vec<String>,
    fillable: Vec<String>,
    column_types: BTreeMap<String, String>,
}

impl TableSchema {
    /// Build a schema, checking that the primary key and every fillable column are declared
    /// columns and that no column is declared twice.
    pub fn new<C, F>(name: impl Into<String>, columns: C, primary_key: impl Into<String>, fillable: F) -> Result<Self>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let name = name.into();
        let primary_key = primary_key.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let fillable: Vec<String> = fillable.into_iter().map(Into::into).collect();

        if name.is_empty() {
            return Err(Error::schema("table name cannot be empty"));
        }
        if columns.is_empty() {
            return Err(Error::schema(format!("table '{name}' declares no columns")));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() || column.contains('.') {
                return Err(Error::schema(format!("table '{name}' declares invalid column name '{column}'")));
            }
            if !seen.insert(column.as_str()) {
                return Err(Error::schema(format!("table '{name}' declares column '{column}' twice")));
            }
        }

        if !seen.contains(primary_key.as_str()) {
            return Err(Error::schema(format!(
                "primary key '{primary_key}' of table '{name}' is not a declared column"
            )));
        }

        let mut fillable_seen = HashSet::new();
        for column in &fillable {
            if !seen.contains(column.as_str()) {
                return Err(Error::schema(format!(
                    "fillable column '{column}' of table '{name}' is not a declared column"
                )));
            }
            if !fillable_seen.insert(column.as_str()) {
                return Err(Error::schema(format!("fillable column '{column}' of table '{name}' is listed twice")));
            }
        }

        Ok(Self {
            name,
            primary_key,
            columns,
            fillable,
            column_types: BTreeMap::new(),
        })
    }

    /// Declare PostgreSQL types for some columns (`timestamptz`, `uuid`, `numeric(10,2)`, ...).
    ///
    /// Values compared with or written to a typed column are cast to that type, so they can be
    /// passed as JSON strings.
    pub fn with_column_types<T, C, S>(mut self, types: T) -> Result<Self>
    where
        T: IntoIterator<Item = (C, S)>,
        C: Into<String>,
        S: Into<String>,
    {
        for (column, sql_type) in types {
            let (column, sql_type) = (column.into(), sql_type.into());
            if !self.has_column(&column) {
                return Err(Error::schema(format!(
                    "type declared for unknown column '{column}' of table '{}'",
                    self.name
                )));
            }
            if !is_valid_type_name(&sql_type) {
                return Err(Error::schema(format!(
                    "column '{column}' of table '{}' declares invalid type '{sql_type}'",
                    self.name
                )));
            }
            self.column_types.insert(column, sql_type);
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn fillable(&self) -> &[String] {
        &self.fillable
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn is_fillable(&self, column: &str) -> bool {
        self.fillable.iter().any(|c| c == column)
    }

    /// Declared SQL type of `column`, if any.
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.column_types.get(column).map(String::as_str)
    }
}

/// Type names are spliced into statement text as casts; allow only what type syntax needs.
fn is_valid_type_name(sql_type: &str) -> bool {
    let trimmed = sql_type.trim();
    !trimmed.is_empty()
        && trimmed.starts_with(|c: char| c.is_ascii_alphabetic())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | '.'))
}

/// Join kind of a relation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The related table holds the foreign key; at most one related row per owner
    HasOne,
    /// The related table holds the foreign key; any number of related rows per owner
    HasMany,
    /// The owner holds the foreign key pointing at the related table
    BelongsTo,
}

/// A named relation edge as declared at bootstrap.
///
/// `local_key` defaults to the owner's primary key for `has_one`/`has_many` and to the related
/// model's primary key for `belongs_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationDeclaration {
    pub name: String,
    pub kind: RelationKind,
    /// Table name of the related model
    pub model: String,
    pub foreign_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
}

/// Bootstrap input for one model, as read from configuration or built in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDeclaration {
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub fillable: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDeclaration>,
    /// Optional SQL types by column name, e.g. `placed_at: timestamptz`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, String>,
}

impl ModelDeclaration {
    pub fn schema(&self) -> Result<TableSchema> {
        TableSchema::new(
            self.table.clone(),
            self.columns.clone(),
            self.primary_key.clone(),
            self.fillable.clone(),
        )?
        .with_column_types(self.types.clone())
    }
}
