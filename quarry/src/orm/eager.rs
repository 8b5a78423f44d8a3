//! Eager-load plans and result stitching.
//!
//! A plan is a forest of relation paths keyed by their full dotted path. `with("posts.comments")`
//! and `with("posts.author")` share the `posts` node, so materialising the plan fetches `posts`
//! once and each child branch once: one `IN` query per node, never one per parent row.

use super::relation::RelationDescriptor;
use crate::db::Database;
use crate::errors::{Error, Result};
use crate::query::QueryContext;
use crate::schema::Registry;
use crate::types::{Row, Value, key_of};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One node of an [`EagerLoadPlan`].
#[derive(Debug, Clone, PartialEq)]
pub struct EagerNode {
    /// Full dotted path, e.g. `posts.comments`
    pub path: String,
    /// Path of the parent node; `None` for relations of the queried model itself
    pub parent: Option<String>,
    pub descriptor: Arc<RelationDescriptor>,
}

/// Relations to materialise alongside one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EagerLoadPlan {
    nodes: BTreeMap<String, EagerNode>,
}

impl EagerLoadPlan {
    /// Walk `path` segment by segment starting at `table`, registering each sub-path that is not
    /// already present. Segments resolve against the model reached by the previous segment.
    pub fn register(&mut self, registry: &Registry, table: &str, path: &str) -> Result<()> {
        let mut current = table.to_string();
        let mut parent: Option<String> = None;

        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(Error::contract(format!("invalid relation path '{path}'")));
            }
            let full = match &parent {
                Some(prefix) => format!("{prefix}.{segment}"),
                None => segment.to_string(),
            };

            let manager = registry.relationships(&current)?;
            let descriptor = match self.nodes.get(&full) {
                Some(node) => node.descriptor.clone(),
                None => manager.get(segment, registry)?,
            };
            manager.create(self, &full, parent.as_deref(), descriptor.clone());

            current = descriptor.target.name().to_string();
            parent = Some(full);
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, node: EagerNode) {
        self.nodes.insert(node.path.clone(), node);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&EagerNode> {
        self.nodes.get(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn roots(&self) -> impl Iterator<Item = &EagerNode> {
        self.children(None)
    }

    pub fn children<'a>(&'a self, parent: Option<&'a str>) -> impl Iterator<Item = &'a EagerNode> + 'a {
        self.nodes.values().filter(move |node| node.parent.as_deref() == parent)
    }
}

/// Driver failure text while materialising a plan.
pub(crate) type Stitched = std::result::Result<(), String>;

/// Materialise every child of `parent` into `rows`, depth first.
///
/// Compile and contract errors propagate as `Err`; a driver failure at any depth stops the walk
/// and comes back as `Ok(Err(message))`.
pub(crate) async fn load(
    db: &Database,
    plan: &EagerLoadPlan,
    parent: Option<&str>,
    rows: &mut [Row],
    cancel: &CancellationToken,
) -> Result<Stitched> {
    for node in plan.children(parent) {
        let descriptor = &node.descriptor;
        let keys = collect_keys(rows, descriptor.parent_key());

        let mut related = if keys.is_empty() {
            Vec::new()
        } else {
            let context = QueryContext::new(descriptor.target.clone())
                .select(["*"])
                .where_in(descriptor.child_key(), keys);
            let envelope = db.execute_with(context, cancel).await?;
            if let Some(error) = envelope.error {
                return Ok(Err(error));
            }
            envelope.into_rows().unwrap_or_default()
        };

        if !related.is_empty() {
            if let Err(error) = Box::pin(load(db, plan, Some(node.path.as_str()), &mut related, cancel)).await? {
                return Ok(Err(error));
            }
        }

        debug!(path = %node.path, parents = rows.len(), related = related.len(), "Relation loaded");
        attach(rows, descriptor, related);
    }
    Ok(Ok(()))
}

/// Distinct non-null values of `column`, in first-seen order.
fn collect_keys(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| key_of(value).is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

fn attach(rows: &mut [Row], descriptor: &RelationDescriptor, related: Vec<Row>) {
    let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
    for row in related {
        if let Some(key) = row.get(descriptor.child_key()).and_then(key_of) {
            grouped.entry(key).or_default().push(row);
        }
    }

    for row in rows.iter_mut() {
        let matches = row.get(descriptor.parent_key()).and_then(key_of).and_then(|key| grouped.get(&key));
        let value = if descriptor.is_many() {
            Value::Array(matches.into_iter().flatten().cloned().map(Value::Object).collect())
        } else {
            matches
                .and_then(|rows| rows.first())
                .cloned()
                .map_or(Value::Null, Value::Object)
        };
        row.insert(descriptor.name.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_registry;

    #[test]
    fn test_register_chain_is_idempotent() {
        let registry = sample_registry();
        let mut plan = EagerLoadPlan::default();

        plan.register(&registry, "users", "posts.comments.author").unwrap();
        plan.register(&registry, "users", "posts.comments.author").unwrap();
        plan.register(&registry, "users", "posts").unwrap();

        assert_eq!(plan.paths().collect::<Vec<_>>(), vec!["posts", "posts.comments", "posts.comments.author"]);
        assert_eq!(plan.get("posts.comments").unwrap().parent.as_deref(), Some("posts"));
        assert_eq!(plan.get("posts.comments.author").unwrap().descriptor.target.name(), "users");
    }

    #[test]
    fn test_shared_prefix_is_not_duplicated() {
        let registry = sample_registry();
        let mut plan = EagerLoadPlan::default();

        plan.register(&registry, "users", "posts.author").unwrap();
        plan.register(&registry, "users", "posts.comments").unwrap();

        assert_eq!(plan.roots().count(), 1);
        let children: Vec<_> = plan.children(Some("posts")).map(|n| n.path.as_str()).collect();
        assert_eq!(children, vec!["posts.author", "posts.comments"]);
    }

    #[test]
    fn test_cyclic_path_of_any_depth_terminates() {
        let registry = sample_registry();
        let path = vec!["posts.author"; 20].join(".");
        let mut plan = EagerLoadPlan::default();

        plan.register(&registry, "users", &path).unwrap();
        assert_eq!(plan.len(), 40);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let registry = sample_registry();
        let mut plan = EagerLoadPlan::default();

        assert!(matches!(plan.register(&registry, "users", "posts..author"), Err(Error::ContractViolation { .. })));
        assert!(matches!(plan.register(&registry, "users", "followers"), Err(Error::UnknownRelation { .. })));
    }

    #[test]
    fn test_attach_groups_by_key() {
        let registry = sample_registry();
        let posts = registry.relationships("users").unwrap().get("posts", &registry).unwrap();
        let mut users: Vec<Row> = vec![
            serde_json::from_value(serde_json::json!({"id": 1})).unwrap(),
            serde_json::from_value(serde_json::json!({"id": 2})).unwrap(),
        ];
        let related: Vec<Row> = vec![
            serde_json::from_value(serde_json::json!({"id": 10, "user_id": 1})).unwrap(),
            serde_json::from_value(serde_json::json!({"id": 11, "user_id": 1})).unwrap(),
        ];

        attach(&mut users, &posts, related);
        assert_eq!(users[0]["posts"].as_array().unwrap().len(), 2);
        assert_eq!(users[1]["posts"], serde_json::json!([]));
    }

    #[test]
    fn test_collect_keys_skips_null_and_duplicates() {
        let rows: Vec<Row> = vec![
            serde_json::from_value(serde_json::json!({"user_id": 1})).unwrap(),
            serde_json::from_value(serde_json::json!({"user_id": null})).unwrap(),
            serde_json::from_value(serde_json::json!({"user_id": 1})).unwrap(),
            serde_json::from_value(serde_json::json!({"user_id": 2})).unwrap(),
        ];
        assert_eq!(collect_keys(&rows, "user_id"), vec![serde_json::json!(1), serde_json::json!(2)]);
    }
}
