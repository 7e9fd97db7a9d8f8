//! # KyroConf - Rule-Based Configuration Resolution
//!
//! KyroConf resolves configuration decisions incrementally against a
//! read-only knowledge base. A client opens a session, receives the open
//! choices of the configuration, and answers them one decision at a time.
//! After every decision the tree is expanded, narrowed and checked so the
//! remaining choices are always the ones that can still be made.
//!
//! ## Core Concepts
//!
//! - **Purpose / Variant**: a role in the product and the alternatives that fill it
//! - **Feature / FeatureValue**: typed properties of a variant and their admissible values
//! - **Concept**: a named bundle of feature values
//! - **Event / Rule**: observations on the tree and the implications between them
//! - **Relation**: a comparison that must hold between two feature values
//! - **Knowledge**: the per-session tree of chosen variants and open choices
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyroconf::{Decision, InMemoryKnowledgeBase, Metadata, ResolutionConfig, ResolutionService};
//!
//! let kb = InMemoryKnowledgeBase::from_json(&catalog_json)?;
//! let service = ResolutionService::new(Arc::new(kb), ResolutionConfig::default());
//!
//! let (session, knowledge) = service.init(Metadata::default()).into_result()?;
//! println!("{} open choices", knowledge.choices.len());
//!
//! let response = service.select(&session, &Decision::feature("car", "colour", "red"), &Metadata::default());
//! for warning in &response.warnings {
//!     println!("warning: {warning}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain model
pub mod error;
pub mod ids;
pub mod knowledge_base;
pub mod value;

// Session state and its building blocks
pub mod choices;
pub mod knowledge;
pub mod relation;
pub mod rules_events;

// Resolution
pub mod resolver;

// Serving
pub mod config;
pub mod runtime;
pub mod service;
pub mod session;

// Re-export primary types at crate root for convenience
pub use config::{ResolutionConfig, RuntimeConfig};
pub use error::{ErrorKind, ResolutionError, ResolutionResult};
pub use ids::{ConceptId, EventId, FeatureId, FeatureValueId, PurposeId, RelationId, RuleId, VariantId};
pub use knowledge::{Choice, Decision, Knowledge, KnowledgeEntity};
pub use knowledge_base::{Catalog, InMemoryKnowledgeBase, KnowledgeBase};
pub use resolver::{Pipeline, ResolutionContext, Resolver};
pub use rules_events::{RulesAndEventsHandler, Standing};
pub use runtime::{ResolutionHandle, ResolutionRuntime};
pub use service::{ResolutionService, Response};
pub use session::{Metadata, SessionId};
pub use value::{FeatureValue, ValueType};
