//! The schema arena: every registered model keyed by table name.

use super::{ModelDeclaration, RelationDeclaration, RelationKind, TableSchema};
use crate::errors::{Error, Result};
use crate::orm::relation::RelationshipManager;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct RegisteredModel {
    pub(crate) schema: Arc<TableSchema>,
    pub(crate) relationships: RelationshipManager,
}

/// Registry of every model known to the process.
///
/// Models refer to each other by table name only; resolution happens lazily through each
/// model's [`RelationshipManager`], so cyclic relation graphs are representable without
/// reference cycles.
#[derive(Debug, Default)]
pub struct Registry {
    models: BTreeMap<String, RegisteredModel>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from bootstrap declarations (e.g. the `models` section of the config).
    pub fn from_declarations(declarations: impl IntoIterator<Item = ModelDeclaration>) -> Result<Self> {
        declarations
            .into_iter()
            .fold(RegistryBuilder::default(), RegistryBuilder::declare)
            .build()
    }

    pub fn schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.entry(table).map(|m| m.schema.clone())
    }

    pub fn relationships(&self, table: &str) -> Result<&RelationshipManager> {
        self.entry(table).map(|m| &m.relationships)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.models.contains_key(table)
    }

    /// Registered table names in sorted order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn entry(&self, table: &str) -> Result<&RegisteredModel> {
        self.models.get(table).ok_or_else(|| Error::UnknownModel { name: table.to_string() })
    }
}

/// Builder collecting model declarations before validating them as a whole.
///
/// Relation methods attach to the model most recently passed to [`RegistryBuilder::init`].
///
/// ```
/// use quarry::Registry;
///
/// let registry = Registry::builder()
///     .init("users", ["id", "name"], "id", ["name"])
///     .has_many("posts", "posts", "user_id")
///     .init("posts", ["id", "user_id", "title"], "id", ["user_id", "title"])
///     .belongs_to("author", "users", "user_id")
///     .build()
///     .unwrap();
///
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declarations: Vec<ModelDeclaration>,
    error: Option<Error>,
}

impl RegistryBuilder {
    /// Bind a table's metadata. Initialising the same table again replaces its schema and drops
    /// the relations declared so far.
    pub fn init<C, F>(mut self, table: impl Into<String>, columns: C, primary_key: impl Into<String>, fillable: F) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let declaration = ModelDeclaration {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            primary_key: primary_key.into(),
            fillable: fillable.into_iter().map(Into::into).collect(),
            relations: Vec::new(),
            types: BTreeMap::new(),
        };
        self.declarations.retain(|d| d.table != declaration.table);
        self.declarations.push(declaration);
        self
    }

    pub fn declare(mut self, declaration: ModelDeclaration) -> Self {
        self.declarations.retain(|d| d.table != declaration.table);
        self.declarations.push(declaration);
        self
    }

    pub fn has_one(self, name: impl Into<String>, model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.edge(name.into(), RelationKind::HasOne, model.into(), foreign_key.into())
    }

    pub fn has_many(self, name: impl Into<String>, model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.edge(name.into(), RelationKind::HasMany, model.into(), foreign_key.into())
    }

    pub fn belongs_to(self, name: impl Into<String>, model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.edge(name.into(), RelationKind::BelongsTo, model.into(), foreign_key.into())
    }

    pub fn relation(mut self, relation: RelationDeclaration) -> Self {
        match self.declarations.last_mut() {
            Some(declaration) => declaration.relations.push(relation),
            None => {
                self.error.get_or_insert_with(|| {
                    Error::schema(format!("relation '{}' declared before any model was initialised", relation.name))
                });
            }
        }
        self
    }

    /// Declare the SQL type of a column of the most recently initialised model.
    pub fn column_type(mut self, column: impl Into<String>, sql_type: impl Into<String>) -> Self {
        let column = column.into();
        match self.declarations.last_mut() {
            Some(declaration) => {
                declaration.types.insert(column, sql_type.into());
            }
            None => {
                self.error.get_or_insert_with(|| {
                    Error::schema(format!("type for column '{column}' declared before any model was initialised"))
                });
            }
        }
        self
    }

    fn edge(self, name: String, kind: RelationKind, model: String, foreign_key: String) -> Self {
        self.relation(RelationDeclaration {
            name,
            kind,
            model,
            foreign_key,
            local_key: None,
        })
    }

    /// Validate every declaration and relation edge, then freeze the registry.
    pub fn build(self) -> Result<Registry> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut schemas = BTreeMap::new();
        for declaration in &self.declarations {
            schemas.insert(declaration.table.clone(), Arc::new(declaration.schema()?));
        }

        for declaration in &self.declarations {
            let owner = &schemas[&declaration.table];
            let mut names = HashSet::new();
            for relation in &declaration.relations {
                if !names.insert(relation.name.as_str()) {
                    return Err(Error::schema(format!(
                        "model '{}' declares relation '{}' twice",
                        declaration.table, relation.name
                    )));
                }
                if relation.name.is_empty() || relation.name.contains('.') {
                    return Err(Error::schema(format!(
                        "model '{}' declares invalid relation name '{}'",
                        declaration.table, relation.name
                    )));
                }
                let target = schemas.get(&relation.model).ok_or_else(|| {
                    Error::schema(format!(
                        "relation '{}.{}' targets unknown model '{}'",
                        declaration.table, relation.name, relation.model
                    ))
                })?;
                check_keys(owner, target, relation)?;
            }
        }

        let models = self
            .declarations
            .into_iter()
            .map(|declaration| {
                let schema = schemas[&declaration.table].clone();
                let relationships = RelationshipManager::new(declaration.table.clone(), declaration.relations);
                (declaration.table, RegisteredModel { schema, relationships })
            })
            .collect::<BTreeMap<_, _>>();

        debug!(models = models.len(), "Schema registry built");
        Ok(Registry { models })
    }
}

/// The foreign key lives on the related table for has-one/has-many and on the owner for
/// belongs-to; the local key lives on the other side.
fn check_keys(owner: &TableSchema, target: &TableSchema, relation: &RelationDeclaration) -> Result<()> {
    let (fk_side, key_side, default_key) = match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => (target, owner, owner.primary_key()),
        RelationKind::BelongsTo => (owner, target, target.primary_key()),
    };
    if !fk_side.has_column(&relation.foreign_key) {
        return Err(Error::schema(format!(
            "relation '{}.{}': foreign key '{}' is not a column of '{}'",
            owner.name(),
            relation.name,
            relation.foreign_key,
            fk_side.name()
        )));
    }
    let local_key = relation.local_key.as_deref().unwrap_or(default_key);
    if !key_side.has_column(local_key) {
        return Err(Error::schema(format!(
            "relation '{}.{}': local key '{}' is not a column of '{}'",
            owner.name(),
            relation.name,
            local_key,
            key_side.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_declarations_build() {
        let registry = Registry::builder()
            .init("users", ["id", "name"], "id", ["name"])
            .has_many("posts", "posts", "user_id")
            .init("posts", ["id", "user_id", "title"], "id", ["title"])
            .belongs_to("author", "users", "user_id")
            .build()
            .unwrap();

        assert_eq!(registry.tables().collect::<Vec<_>>(), vec!["posts", "users"]);
        assert_eq!(registry.schema("users").unwrap().primary_key(), "id");
        assert!(registry.relationships("posts").is_ok());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = Registry::builder()
            .init("users", ["id"], "id", Vec::<String>::new())
            .has_many("posts", "posts", "user_id")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown model 'posts'"));
    }

    #[test]
    fn test_foreign_key_must_exist_on_owning_side() {
        let err = Registry::builder()
            .init("users", ["id"], "id", Vec::<String>::new())
            .has_many("posts", "posts", "author_id")
            .init("posts", ["id", "user_id"], "id", Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("author_id"));
    }

    #[test]
    fn test_relation_before_init_rejected() {
        let err = Registry::builder().has_one("profile", "profiles", "user_id").build().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_reinit_replaces_declaration() {
        let registry = Registry::builder()
            .init("users", ["id", "name"], "id", ["name"])
            .init("users", ["id", "email"], "id", ["email"])
            .build()
            .unwrap();
        let schema = registry.schema("users").unwrap();
        assert!(schema.has_column("email"));
        assert!(!schema.has_column("name"));
    }

    #[test]
    fn test_unknown_model_lookup() {
        let registry = Registry::default();
        assert!(matches!(registry.schema("ghosts"), Err(Error::UnknownModel { .. })));
    }

    #[test]
    fn test_column_type_attaches_to_last_model() {
        let registry = Registry::builder()
            .init("orders", ["id", "placed_at"], "id", ["placed_at"])
            .column_type("placed_at", "timestamptz")
            .build()
            .unwrap();
        let schema = registry.schema("orders").unwrap();
        assert_eq!(schema.column_type("placed_at"), Some("timestamptz"));

        let err = Registry::builder()
            .init("orders", ["id"], "id", Vec::<String>::new())
            .column_type("placed_at", "timestamptz")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
