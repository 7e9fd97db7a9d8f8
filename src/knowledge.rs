//! Resolved knowledge tree, open choices and client decisions.
//!
//! A [`Knowledge`] value is owned by its session and only replaced as a
//! whole. Resolvers work on a clone and hand the new tree back, so a failed
//! pipeline never leaves a partially edited tree behind.
//!
//! Entities are addressed by an [`EntityPath`]: the child indices from the
//! forest down to the entity. The empty path addresses the forest itself,
//! whose open choices are the variant choices of the root purposes.

use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{ConceptId, FeatureId, FeatureValueId, PurposeId, VariantId};
use crate::value::FeatureValue;

/// Child indices from the forest to an entity.
pub type EntityPath = Vec<usize>;

/// Open choice of a variant for a purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantChoice {
    pub purpose: PurposeId,
    /// Remaining candidate variants.
    pub variants: Vec<VariantId>,
    pub quantity: u32,
}

/// Open choice of a value for a feature of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureChoice {
    pub variant: VariantId,
    pub feature: FeatureId,
    /// Remaining legal values.
    pub values: Vec<FeatureValue>,
}

impl FeatureChoice {
    /// Returns true if `value` is still selectable.
    #[must_use]
    pub fn offers(&self, value: &FeatureValueId) -> bool {
        self.values.iter().any(|v| &v.id == value)
    }
}

/// Open choice among the concepts attached to a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptChoice {
    pub variant: VariantId,
    pub concepts: Vec<ConceptId>,
}

/// Any open choice, as reported to clients.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Choice {
    Variant(VariantChoice),
    Feature(FeatureChoice),
    Concept(ConceptChoice),
}

/// A client decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Pick `variant` for `purpose`.
    Variant { purpose: PurposeId, variant: VariantId },
    /// Pick `value` for `feature` on `variant`.
    Feature {
        variant: VariantId,
        feature: FeatureId,
        value: FeatureValueId,
    },
    /// Apply all values of `concept` to `variant`.
    Concept { variant: VariantId, concept: ConceptId },
}

impl Decision {
    #[must_use]
    pub fn variant(purpose: impl Into<PurposeId>, variant: impl Into<VariantId>) -> Self {
        Self::Variant {
            purpose: purpose.into(),
            variant: variant.into(),
        }
    }

    #[must_use]
    pub fn feature(
        variant: impl Into<VariantId>,
        feature: impl Into<FeatureId>,
        value: impl Into<FeatureValueId>,
    ) -> Self {
        Self::Feature {
            variant: variant.into(),
            feature: feature.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn concept(variant: impl Into<VariantId>, concept: impl Into<ConceptId>) -> Self {
        Self::Concept {
            variant: variant.into(),
            concept: concept.into(),
        }
    }
}

/// A resolved `(purpose, variant)` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub purpose: PurposeId,
    pub variant: VariantId,
    pub quantity: u32,
    /// Applied feature values, at most one per feature.
    #[serde(default)]
    pub values: Vec<FeatureValue>,
    /// Concepts applied by decision.
    #[serde(default)]
    pub concepts: Vec<ConceptId>,
    #[serde(default)]
    pub children: Vec<KnowledgeEntity>,
    #[serde(default)]
    pub variant_choices: Vec<VariantChoice>,
    #[serde(default)]
    pub feature_choices: Vec<FeatureChoice>,
    #[serde(default)]
    pub concept_choices: Vec<ConceptChoice>,
}

impl KnowledgeEntity {
    /// Creates an entity without values, children or choices.
    #[must_use]
    pub fn new(purpose: PurposeId, variant: VariantId, quantity: u32) -> Self {
        Self {
            purpose,
            variant,
            quantity,
            values: Vec::new(),
            concepts: Vec::new(),
            children: Vec::new(),
            variant_choices: Vec::new(),
            feature_choices: Vec::new(),
            concept_choices: Vec::new(),
        }
    }

    /// The value applied for `feature`, if any.
    #[must_use]
    pub fn applied_value(&self, feature: &FeatureId) -> Option<&FeatureValue> {
        self.values.iter().find(|v| &v.feature == feature)
    }

    /// Applies a value, replacing any previous value of the same feature.
    pub fn apply_value(&mut self, value: FeatureValue) {
        self.values.retain(|v| v.feature != value.feature);
        self.values.push(value);
    }

    /// Child resolved for `(purpose, variant)`.
    #[must_use]
    pub fn child(&self, purpose: &PurposeId, variant: &VariantId) -> Option<usize> {
        self.children
            .iter()
            .position(|c| &c.purpose == purpose && &c.variant == variant)
    }

    /// Open feature choice for `feature`.
    #[must_use]
    pub fn feature_choice(&self, feature: &FeatureId) -> Option<&FeatureChoice> {
        self.feature_choices.iter().find(|c| &c.feature == feature)
    }

    /// Open variant choice for `purpose`.
    #[must_use]
    pub fn variant_choice(&self, purpose: &PurposeId) -> Option<&VariantChoice> {
        self.variant_choices.iter().find(|c| &c.purpose == purpose)
    }

    fn collect_choices(&self, out: &mut Vec<Choice>) {
        out.extend(self.variant_choices.iter().cloned().map(Choice::Variant));
        out.extend(self.feature_choices.iter().cloned().map(Choice::Feature));
        out.extend(self.concept_choices.iter().cloned().map(Choice::Concept));
        for child in &self.children {
            child.collect_choices(out);
        }
    }
}

/// Outcome of following `(purpose, variant)` steps down the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walk {
    /// Every step is materialized.
    Found(EntityPath),
    /// Some step is still an open choice.
    Pending,
    /// Some step can no longer be materialized.
    Excluded,
}

/// The resolved forest plus the flattened list of open choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Knowledge {
    pub roots: Vec<KnowledgeEntity>,
    /// Variant choices of root purposes not yet decided.
    pub root_choices: Vec<VariantChoice>,
    /// Every open choice in depth-first order. Rebuilt by [`Knowledge::refresh_choices`].
    pub choices: Vec<Choice>,
}

impl Knowledge {
    /// Entity at `at`; `None` for the empty path or an out-of-range index.
    #[must_use]
    pub fn entity(&self, at: &[usize]) -> Option<&KnowledgeEntity> {
        let (first, rest) = at.split_first()?;
        let mut current = self.roots.get(*first)?;
        for &i in rest {
            current = current.children.get(i)?;
        }
        Some(current)
    }

    #[must_use]
    pub fn entity_mut(&mut self, at: &[usize]) -> Option<&mut KnowledgeEntity> {
        let (first, rest) = at.split_first()?;
        let mut current = self.roots.get_mut(*first)?;
        for &i in rest {
            current = current.children.get_mut(i)?;
        }
        Some(current)
    }

    /// Like [`Knowledge::entity_mut`] but reports a missing entity as an error.
    pub fn require_entity_mut(&mut self, at: &[usize]) -> ResolutionResult<&mut KnowledgeEntity> {
        self.entity_mut(at)
            .ok_or_else(|| ResolutionError::internal(format!("no knowledge entity at {at:?}")))
    }

    /// Children of the entity at `at`, or the roots for the empty path.
    #[must_use]
    pub fn children(&self, at: &[usize]) -> Option<&Vec<KnowledgeEntity>> {
        if at.is_empty() {
            return Some(&self.roots);
        }
        self.entity(at).map(|e| &e.children)
    }

    pub fn children_mut(&mut self, at: &[usize]) -> Option<&mut Vec<KnowledgeEntity>> {
        if at.is_empty() {
            return Some(&mut self.roots);
        }
        self.entity_mut(at).map(|e| &mut e.children)
    }

    /// Variant choices held at `at`, or the root choices for the empty path.
    #[must_use]
    pub fn variant_choices(&self, at: &[usize]) -> Option<&Vec<VariantChoice>> {
        if at.is_empty() {
            return Some(&self.root_choices);
        }
        self.entity(at).map(|e| &e.variant_choices)
    }

    pub fn variant_choices_mut(&mut self, at: &[usize]) -> Option<&mut Vec<VariantChoice>> {
        if at.is_empty() {
            return Some(&mut self.root_choices);
        }
        self.entity_mut(at).map(|e| &mut e.variant_choices)
    }

    /// Every entity path, pre-order.
    #[must_use]
    pub fn paths(&self) -> Vec<EntityPath> {
        fn visit(entity: &KnowledgeEntity, path: &mut EntityPath, out: &mut Vec<EntityPath>) {
            out.push(path.clone());
            for (i, child) in entity.children.iter().enumerate() {
                path.push(i);
                visit(child, path, out);
                path.pop();
            }
        }

        let mut out = Vec::new();
        let mut path = Vec::new();
        for (i, root) in self.roots.iter().enumerate() {
            path.push(i);
            visit(root, &mut path, &mut out);
            path.pop();
        }
        out
    }

    /// Paths of every entity resolved to `variant`, pre-order.
    #[must_use]
    pub fn find_root(&self, variant: &VariantId) -> Vec<EntityPath> {
        self.paths()
            .into_iter()
            .filter(|p| self.entity(p).is_some_and(|e| &e.variant == variant))
            .collect()
    }

    /// Variants from the forest down to `at`, inclusive.
    #[must_use]
    pub fn ancestry(&self, at: &[usize]) -> Vec<VariantId> {
        (1..=at.len())
            .filter_map(|n| self.entity(&at[..n]).map(|e| e.variant.clone()))
            .collect()
    }

    /// Follows `steps` from the entity at `from`.
    #[must_use]
    pub fn walk(&self, from: &[usize], steps: &[(PurposeId, VariantId)]) -> Walk {
        let mut path = from.to_vec();
        for (purpose, variant) in steps {
            let Some(entity) = self.entity(&path) else {
                return Walk::Excluded;
            };
            if let Some(i) = entity.child(purpose, variant) {
                path.push(i);
                continue;
            }
            let still_open = entity
                .variant_choice(purpose)
                .is_some_and(|c| c.variants.contains(variant));
            return if still_open { Walk::Pending } else { Walk::Excluded };
        }
        Walk::Found(path)
    }

    /// Parent holding an open variant choice of `variant` for `purpose`.
    ///
    /// Root choices are searched first, then entities in pre-order.
    #[must_use]
    pub fn find_variant_choice(&self, purpose: &PurposeId, variant: &VariantId) -> Option<EntityPath> {
        let offers = |choices: &[VariantChoice]| {
            choices
                .iter()
                .any(|c| &c.purpose == purpose && c.variants.contains(variant))
        };
        if offers(&self.root_choices) {
            return Some(Vec::new());
        }
        self.paths()
            .into_iter()
            .find(|p| self.entity(p).is_some_and(|e| offers(&e.variant_choices)))
    }

    /// Entity of `variant` whose open choice for `feature` offers `value`.
    #[must_use]
    pub fn find_feature_choice(
        &self,
        variant: &VariantId,
        feature: &FeatureId,
        value: &FeatureValueId,
    ) -> Option<EntityPath> {
        self.find_root(variant).into_iter().find(|p| {
            self.entity(p)
                .and_then(|e| e.feature_choice(feature))
                .is_some_and(|c| c.offers(value))
        })
    }

    /// Entity of `variant` whose open concept choice offers `concept`.
    #[must_use]
    pub fn find_concept_choice(&self, variant: &VariantId, concept: &ConceptId) -> Option<EntityPath> {
        self.find_root(variant).into_iter().find(|p| {
            self.entity(p)
                .is_some_and(|e| e.concept_choices.iter().any(|c| c.concepts.contains(concept)))
        })
    }

    /// Rebuilds the flattened `choices` list from the tree.
    pub fn refresh_choices(&mut self) {
        let mut out: Vec<Choice> = self.root_choices.iter().cloned().map(Choice::Variant).collect();
        for root in &self.roots {
            root.collect_choices(&mut out);
        }
        self.choices = out;
    }

    /// Number of resolved entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.paths().len()
    }

    /// Returns true once nothing is left to decide.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.choices.is_empty()
    }

    /// Stable content hash of the tree, hex encoded.
    pub fn fingerprint(&self) -> ResolutionResult<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| ResolutionError::internal(format!("knowledge is not serializable: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}
