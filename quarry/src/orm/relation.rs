//! Per-model relation edges, resolved on first access.

use super::eager::{EagerLoadPlan, EagerNode};
use crate::errors::{Error, Result};
use crate::schema::{Registry, RelationDeclaration, RelationKind, TableSchema};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// One resolved edge of the relation graph.
///
/// Holds the related model's schema by shared handle; the related model's own relations are
/// not resolved until someone asks for them, which is what keeps cyclic graphs finite.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub name: String,
    /// Table of the model declaring the edge
    pub owner: String,
    pub target: Arc<TableSchema>,
    pub kind: RelationKind,
    pub foreign_key: String,
    pub local_key: String,
}

impl RelationDescriptor {
    /// Column read from the owning rows to collect lookup keys.
    pub fn parent_key(&self) -> &str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => &self.local_key,
            RelationKind::BelongsTo => &self.foreign_key,
        }
    }

    /// Column of the related table matched against the collected keys.
    pub fn child_key(&self) -> &str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => &self.foreign_key,
            RelationKind::BelongsTo => &self.local_key,
        }
    }

    pub fn is_many(&self) -> bool {
        self.kind == RelationKind::HasMany
    }
}

/// Named relation edges of one model.
///
/// Declarations are plain data; descriptors are built from them on first [`get`](Self::get)
/// and memoized for the lifetime of the registry.
#[derive(Debug)]
pub struct RelationshipManager {
    table: String,
    declarations: Vec<RelationDeclaration>,
    cache: DashMap<String, Arc<RelationDescriptor>>,
}

impl RelationshipManager {
    pub fn new(table: String, declarations: Vec<RelationDeclaration>) -> Self {
        Self {
            table,
            declarations,
            cache: DashMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of descriptors resolved so far.
    pub fn resolved(&self) -> usize {
        self.cache.len()
    }

    /// Descriptor for `name`, built and cached on first access.
    pub fn get(&self, name: &str, registry: &Registry) -> Result<Arc<RelationDescriptor>> {
        if let Some(descriptor) = self.cache.get(name) {
            return Ok(descriptor.clone());
        }

        let declaration = self
            .declarations
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::UnknownRelation {
                model: self.table.clone(),
                relation: name.to_string(),
            })?;

        let target = registry.schema(&declaration.model)?;
        let local_key = match (&declaration.local_key, declaration.kind) {
            (Some(key), _) => key.clone(),
            (None, RelationKind::BelongsTo) => target.primary_key().to_string(),
            (None, _) => registry.schema(&self.table)?.primary_key().to_string(),
        };
        let descriptor = Arc::new(RelationDescriptor {
            name: declaration.name.clone(),
            owner: self.table.clone(),
            target,
            kind: declaration.kind,
            foreign_key: declaration.foreign_key.clone(),
            local_key,
        });

        trace!(model = %self.table, relation = name, "Relation resolved");
        // A concurrent first access may have won the race; keep whichever landed first.
        Ok(self.cache.entry(name.to_string()).or_insert(descriptor).clone())
    }

    /// Register the eager-load node for `path` unless it already exists.
    ///
    /// Returns `true` when a node was added.
    pub fn create(&self, plan: &mut EagerLoadPlan, path: &str, parent: Option<&str>, descriptor: Arc<RelationDescriptor>) -> bool {
        if plan.contains(path) {
            return false;
        }
        plan.insert(EagerNode {
            path: path.to_string(),
            parent: parent.map(str::to_string),
            descriptor,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_registry;

    #[test]
    fn test_get_is_lazy_and_memoized() {
        let registry = sample_registry();
        let users = registry.relationships("users").unwrap();
        assert_eq!(users.resolved(), 0);

        let first = users.get("posts", &registry).unwrap();
        let second = users.get("posts", &registry).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(users.resolved(), 1);
        assert_eq!(first.target.name(), "posts");
        assert_eq!(first.parent_key(), "id");
        assert_eq!(first.child_key(), "user_id");
    }

    #[test]
    fn test_belongs_to_keys() {
        let registry = sample_registry();
        let author = registry.relationships("posts").unwrap().get("author", &registry).unwrap();
        assert_eq!(author.kind, RelationKind::BelongsTo);
        assert_eq!(author.parent_key(), "user_id");
        assert_eq!(author.child_key(), "id");
        assert!(!author.is_many());
    }

    #[test]
    fn test_cyclic_graph_terminates() {
        let registry = sample_registry();
        let mut table = "users".to_string();
        // users -> posts -> author -> posts -> author ...
        for hop in 0..50 {
            let name = if hop % 2 == 0 { "posts" } else { "author" };
            let descriptor = registry.relationships(&table).unwrap().get(name, &registry).unwrap();
            table = descriptor.target.name().to_string();
        }
        assert_eq!(table, "users");
        assert_eq!(registry.relationships("users").unwrap().resolved(), 1);
        assert_eq!(registry.relationships("posts").unwrap().resolved(), 1);
    }

    #[test]
    fn test_unknown_relation() {
        let registry = sample_registry();
        let err = registry.relationships("users").unwrap().get("followers", &registry).unwrap_err();
        assert!(matches!(err, Error::UnknownRelation { ref relation, .. } if relation == "followers"));
    }

    #[test]
    fn test_create_is_idempotent() {
        let registry = sample_registry();
        let users = registry.relationships("users").unwrap();
        let posts = users.get("posts", &registry).unwrap();

        let mut plan = EagerLoadPlan::default();
        assert!(users.create(&mut plan, "posts", None, posts.clone()));
        assert!(!users.create(&mut plan, "posts", None, posts));
        assert_eq!(plan.len(), 1);
    }
}
