//! Knowledge base collaborator.
//!
//! The resolution core only depends on the [`KnowledgeBase`] trait. An
//! in-memory implementation built from a JSON [`Catalog`] is provided for
//! embedding and tests.

mod memory;
pub mod model;
mod traits;

pub use memory::{Catalog, InMemoryKnowledgeBase};
pub use model::{
    Concept, Constitutes, ContextPath, Event, Feature, FeatureDomain, Fulfills, Operator, Purpose, Relation,
    RelationParameter, Rule, TriggerType, Variant,
};
pub use traits::KnowledgeBase;
