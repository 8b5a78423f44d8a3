//! Condition trees for `WHERE` and `HAVING`.

use crate::types::{BooleanOp, Value};
use serde::{Deserialize, Serialize};

/// One `(column, operator, value)` triple.
///
/// The operator is kept as written and validated when the statement is compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub operator: String,
    pub value: Value,
}

/// Shorthand for building a [`Condition`].
pub fn cond(column: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        column: column.into(),
        operator: operator.into(),
        value: value.into(),
    }
}

impl<C, O, V> From<(C, O, V)> for Condition
where
    C: Into<String>,
    O: Into<String>,
    V: Into<Value>,
{
    fn from((column, operator, value): (C, O, V)) -> Self {
        cond(column, operator, value)
    }
}

/// A node of the condition tree: a leaf triple or a boolean group.
///
/// `Not` groups hold exactly one child, the negated group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionNode {
    Leaf(Condition),
    Group { op: BooleanOp, children: Vec<ConditionNode> },
}

impl ConditionNode {
    /// Attach `node` to `root` with `op`.
    ///
    /// A root that is already a group of the same combinator gains another child; anything else
    /// becomes the first child of a new group, so `a OR b AND c` reads as `(a OR b) AND c`.
    pub(crate) fn attach(root: Option<ConditionNode>, op: BooleanOp, node: ConditionNode) -> ConditionNode {
        match root {
            None => node,
            Some(ConditionNode::Group { op: existing, mut children }) if existing == op && op != BooleanOp::Not => {
                children.push(node);
                ConditionNode::Group { op, children }
            }
            Some(other) => ConditionNode::Group {
                op,
                children: vec![other, node],
            },
        }
    }

    pub(crate) fn negate(self) -> ConditionNode {
        ConditionNode::Group {
            op: BooleanOp::Not,
            children: vec![self],
        }
    }

    /// Leaves in left-to-right order, the order their parameters are bound in.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            ConditionNode::Leaf(condition) => out.push(condition),
            ConditionNode::Group { children, .. } => children.iter().for_each(|c| c.collect_leaves(out)),
        }
    }
}

/// Input accepted by every condition method: a list of triples (implicitly ANDed) or a tree
/// produced by a nested builder.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditions {
    List(Vec<Condition>),
    Tree(ConditionNode),
}

impl Conditions {
    /// Build a nested group with a callback, for arbitrary grouping.
    ///
    /// ```
    /// use quarry::query::{cond, Conditions};
    ///
    /// let group = Conditions::group(|q| {
    ///     q.where_(vec![cond("role", "=", "admin")])
    ///         .or_where(vec![cond("role", "=", "owner")]);
    /// });
    /// assert!(group.into_node().is_some());
    /// ```
    pub fn group(build: impl FnOnce(&mut ConditionBuilder)) -> Self {
        let mut builder = ConditionBuilder::default();
        build(&mut builder);
        match builder.root {
            Some(node) => Conditions::Tree(node),
            None => Conditions::List(Vec::new()),
        }
    }

    /// Collapse into a single node; `None` for an empty list.
    pub fn into_node(self) -> Option<ConditionNode> {
        match self {
            Conditions::Tree(node) => Some(node),
            Conditions::List(mut list) => match list.len() {
                0 => None,
                1 => list.pop().map(ConditionNode::Leaf),
                _ => Some(ConditionNode::Group {
                    op: BooleanOp::And,
                    children: list.into_iter().map(ConditionNode::Leaf).collect(),
                }),
            },
        }
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        Conditions::List(list)
    }
}

impl<const N: usize> From<[Condition; N]> for Conditions {
    fn from(list: [Condition; N]) -> Self {
        Conditions::List(list.into())
    }
}

impl From<Condition> for Conditions {
    fn from(condition: Condition) -> Self {
        Conditions::List(vec![condition])
    }
}

impl From<ConditionNode> for Conditions {
    fn from(node: ConditionNode) -> Self {
        Conditions::Tree(node)
    }
}

/// Accumulates a condition tree; also the argument of [`Conditions::group`] callbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionBuilder {
    root: Option<ConditionNode>,
}

impl ConditionBuilder {
    pub fn where_(&mut self, conditions: impl Into<Conditions>) -> &mut Self {
        self.push(BooleanOp::And, conditions.into(), false)
    }

    pub fn and_where(&mut self, conditions: impl Into<Conditions>) -> &mut Self {
        self.push(BooleanOp::And, conditions.into(), false)
    }

    pub fn or_where(&mut self, conditions: impl Into<Conditions>) -> &mut Self {
        self.push(BooleanOp::Or, conditions.into(), false)
    }

    /// Negate the group and combine it with the prior predicates using `op` (`And` or `Or`).
    pub fn where_not(&mut self, conditions: impl Into<Conditions>, op: BooleanOp) -> &mut Self {
        let op = if op == BooleanOp::Or { BooleanOp::Or } else { BooleanOp::And };
        self.push(op, conditions.into(), true)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&ConditionNode> {
        self.root.as_ref()
    }

    fn push(&mut self, op: BooleanOp, conditions: Conditions, negate: bool) -> &mut Self {
        if let Some(node) = conditions.into_node() {
            let node = if negate { node.negate() } else { node };
            self.root = Some(ConditionNode::attach(self.root.take(), op, node));
        }
        self
    }
}
