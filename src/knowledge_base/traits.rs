//! Read-only knowledge base contract.
//!
//! The resolution core never mutates the knowledge base. Every lookup is
//! pure; implementations may precompute whatever indices they like.

use crate::error::ResolutionResult;
use crate::ids::{ConceptId, EventId, FeatureId, FeatureValueId, PurposeId, RelationId, RuleId, VariantId};
use crate::value::FeatureValue;

use super::model::{Concept, Event, Feature, Purpose, Relation, Rule, Variant};

/// Catalog lookups needed by the resolvers.
///
/// Id lists for unknown keys are empty rather than errors.
pub trait KnowledgeBase: Send + Sync {
    fn purpose(&self, id: &PurposeId) -> Option<&Purpose>;

    fn variant(&self, id: &VariantId) -> Option<&Variant>;

    fn feature(&self, id: &FeatureId) -> Option<&Feature>;

    fn feature_value(&self, id: &FeatureValueId) -> Option<&FeatureValue>;

    fn concept(&self, id: &ConceptId) -> Option<&Concept>;

    fn event(&self, id: &EventId) -> Option<&Event>;

    fn rule(&self, id: &RuleId) -> Option<&Rule>;

    fn relation(&self, id: &RelationId) -> Option<&Relation>;

    /// Candidate variants for a purpose.
    fn fulfills(&self, purpose: &PurposeId) -> &[VariantId];

    /// Sub-purposes a variant requires.
    fn constitutes(&self, variant: &VariantId) -> &[PurposeId];

    /// Default quantity of `variant` when chosen for `purpose`.
    fn quantity(&self, purpose: &PurposeId, variant: &VariantId) -> u32;

    fn is_fulfilled_by(&self, purpose: &PurposeId, variant: &VariantId) -> bool {
        self.fulfills(purpose).contains(variant)
    }

    fn is_constituted_by(&self, variant: &VariantId, purpose: &PurposeId) -> bool {
        self.constitutes(variant).contains(purpose)
    }

    /// Features a variant carries.
    fn features(&self, variant: &VariantId) -> &[FeatureId];

    /// All legal values of `feature` on `variant`.
    ///
    /// # Errors
    /// - `InvalidRange` if a ranged feature has malformed parameters
    /// - `InconsistentKnowledgeBase` if the variant does not carry the feature
    fn feature_values(&self, variant: &VariantId, feature: &FeatureId) -> ResolutionResult<Vec<FeatureValue>>;

    fn attached_events(&self, variant: &VariantId) -> &[EventId];

    fn attached_rules(&self, variant: &VariantId) -> &[RuleId];

    fn attached_relations(&self, variant: &VariantId) -> &[RelationId];

    fn attached_concepts(&self, variant: &VariantId) -> &[ConceptId];

    /// Purposes that seed a fresh knowledge tree.
    fn root_purposes(&self) -> &[PurposeId];

    /// Every event in catalog order.
    fn events(&self) -> Vec<&Event>;

    /// Every rule in catalog order.
    fn rules(&self) -> Vec<&Rule>;
}
