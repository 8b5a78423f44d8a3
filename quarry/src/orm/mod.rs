//! Models, their relation graph and eager loading.

pub mod eager;
mod model;
pub mod relation;

pub use eager::{EagerLoadPlan, EagerNode};
pub use model::{Model, ModelQuery, ReadResult, WriteResult};
pub use relation::{RelationDescriptor, RelationshipManager};
