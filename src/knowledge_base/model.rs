//! Catalog element types.
//!
//! These are the read-only building blocks a knowledge base is made of.
//! They carry no resolution state.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ConceptId, EventId, FeatureId, FeatureValueId, PurposeId, RelationId, RuleId, VariantId};
use crate::value::ValueType;

/// An abstract need fulfilled by choosing a Variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purpose {
    pub id: PurposeId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Root purposes seed the knowledge tree.
    #[serde(default)]
    pub is_root: bool,
}

/// A concrete option that fulfills a Purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Features the variant may carry, in presentation order.
    #[serde(default)]
    pub features: Vec<FeatureId>,
}

/// The legal values of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureDomain {
    /// Explicitly enumerated values.
    Values { values: Vec<FeatureValueId> },
    /// Numeric range, `min` to `max` inclusive.
    Range {
        min: String,
        max: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<String>,
    },
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    #[serde(default)]
    pub label: String,
    pub value_type: ValueType,
    pub domain: FeatureDomain,
}

/// A named bundle of feature values bound to a variant as one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    /// Variant the concept is attached to.
    pub variant: VariantId,
    #[serde(default)]
    pub label: String,
    pub values: Vec<FeatureValueId>,
}

/// Purpose → candidate variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfills {
    pub purpose: PurposeId,
    pub variants: Vec<VariantId>,
    /// Default quantity of the chosen variant.
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

const fn default_quantity() -> u32 {
    1
}

/// Variant → sub-purposes it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constitutes {
    pub variant: VariantId,
    pub purposes: Vec<PurposeId>,
}

/// Root-to-node path of alternating variant and purpose ids.
///
/// `[V0, P1, V1, P2, V2]` starts at the root variant `V0` and descends
/// through `(P1, V1)` then `(P2, V2)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextPath(Vec<String>);

impl ContextPath {
    /// Creates a path from its raw elements.
    #[must_use]
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(elements.into_iter().map(Into::into).collect())
    }

    /// Raw elements.
    #[must_use]
    pub fn elements(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// First element, which must be a variant id.
    #[must_use]
    pub fn root(&self) -> Option<VariantId> {
        self.0.first().map(|s| VariantId::new(s.as_str()))
    }

    /// `(purpose, variant)` steps after the root.
    ///
    /// A trailing purpose without a variant is not a step.
    #[must_use]
    pub fn steps(&self) -> Vec<(PurposeId, VariantId)> {
        self.0
            .get(1..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|pair| (PurposeId::new(pair[0].as_str()), VariantId::new(pair[1].as_str())))
            .collect()
    }
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// What kind of selection an event observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Variant,
    FeatureValue,
    Concept,
}

/// A condition on a selection at a context path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Owning variant; the context path starts here.
    pub variant: VariantId,
    pub context_path: ContextPath,
    pub trigger_type: TriggerType,
    /// Variant, feature value or concept id, depending on `trigger_type`.
    pub trigger_id: String,
    /// When set the event holds if the selection is absent.
    #[serde(default)]
    pub not_event: bool,
}

/// Premise event → conclusion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub variant: VariantId,
    pub premise: EventId,
    pub conclusion: EventId,
}

/// Comparison operator of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    /// Returns true for operators that need an ordering.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Applies the operator to the result of `left.cmp(right)`.
    ///
    /// `None` means the operands are unordered and unequal.
    #[must_use]
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Eq, o) => o == Some(Ordering::Equal),
            (Self::Neq, o) => o != Some(Ordering::Equal),
            (_, None) => false,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationParameter {
    /// A fixed feature value.
    Constant { value: FeatureValueId },
    /// Whatever value the feature takes at the end of the path.
    Variable { feature: FeatureId, context_path: ContextPath },
}

/// Cross-feature constraint `left <op> right`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub variant: VariantId,
    pub operator: Operator,
    pub left: RelationParameter,
    pub right: RelationParameter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_path_steps() {
        let path = ContextPath::new(["car", "engine", "v8", "fuel", "petrol"]);
        assert_eq!(path.root(), Some(VariantId::new("car")));
        assert_eq!(
            path.steps(),
            vec![
                (PurposeId::new("engine"), VariantId::new("v8")),
                (PurposeId::new("fuel"), VariantId::new("petrol")),
            ]
        );
        assert_eq!(path.to_string(), "car/engine/v8/fuel/petrol");
        assert!(ContextPath::default().steps().is_empty());
    }

    #[test]
    fn operator_semantics() {
        assert!(Operator::Le.holds(Some(Ordering::Equal)));
        assert!(!Operator::Lt.holds(Some(Ordering::Equal)));
        assert!(Operator::Neq.holds(None));
        assert!(!Operator::Gt.holds(None));
    }

    #[test]
    fn parameter_serde_shape() {
        let json = r#"{"kind":"variable","feature":"power","context_path":["car","engine","v8"]}"#;
        let p: RelationParameter = serde_json::from_str(json).unwrap();
        assert!(matches!(p, RelationParameter::Variable { .. }));
        let op: Operator = serde_json::from_str("\"GE\"").unwrap();
        assert_eq!(op, Operator::Ge);
    }
}
