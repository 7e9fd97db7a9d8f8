//! Relation evaluation and propagation.
//!
//! A relation compares two parameters, each either a constant feature value
//! or the value a feature takes somewhere below the relation's owning
//! variant. Context paths are relative to an instance of that variant.
//!
//! When both sides are fixed the relation is checked. When exactly one side
//! is still an open feature choice, that choice is filtered down to the
//! values that satisfy the relation against the fixed side.

use tracing::warn;

use crate::choices::restrict_feature_choice;
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{FeatureId, FeatureValueId, VariantId};
use crate::knowledge::{EntityPath, Knowledge, Walk};
use crate::knowledge_base::{ContextPath, Feature, KnowledgeBase, Operator, Relation, RelationParameter};
use crate::value::{compare, compatible, FeatureValue, ValueType};

/// Checks that `path` is a well-formed walk from `root` through the catalog.
///
/// Returns the variant the path ends on.
///
/// # Errors
/// `InconsistentKnowledgeBase` if the path is empty, does not start at
/// `root`, does not end on a variant, or uses an edge missing from the
/// Fulfills/Constitutes graph.
pub fn validate_context_path(
    kb: &dyn KnowledgeBase,
    root: &VariantId,
    path: &ContextPath,
) -> ResolutionResult<VariantId> {
    let Some(first) = path.root() else {
        return Err(ResolutionError::inconsistent("context path is empty"));
    };
    if &first != root {
        return Err(ResolutionError::inconsistent(format!(
            "context path '{path}' does not start at '{root}'"
        )));
    }
    if kb.variant(&first).is_none() {
        return Err(ResolutionError::inconsistent(format!(
            "context path '{path}' starts at unknown variant '{first}'"
        )));
    }
    if path.len() % 2 == 0 {
        return Err(ResolutionError::inconsistent(format!(
            "context path '{path}' ends on a purpose"
        )));
    }

    let mut current = first;
    for (purpose, variant) in path.steps() {
        if kb.purpose(&purpose).is_none() || !kb.is_constituted_by(&current, &purpose) {
            return Err(ResolutionError::inconsistent(format!(
                "context path '{path}': '{current}' does not constitute '{purpose}'"
            )));
        }
        if kb.variant(&variant).is_none() || !kb.is_fulfilled_by(&purpose, &variant) {
            return Err(ResolutionError::inconsistent(format!(
                "context path '{path}': '{purpose}' is not fulfilled by '{variant}'"
            )));
        }
        current = variant;
    }
    Ok(current)
}

/// A relation parameter resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedParameter<'a> {
    /// Constant side.
    Value(FeatureValue),
    /// Variable side: `feature` as carried by `variant`.
    Feature { variant: VariantId, feature: &'a Feature },
}

impl ResolvedParameter<'_> {
    /// Static type of the parameter.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Value(value) => value.value_type,
            Self::Feature { feature, .. } => feature.value_type,
        }
    }
}

/// Resolves one side of a relation owned by `owner`.
///
/// # Errors
/// `InconsistentKnowledgeBase` for an unknown value or feature, an invalid
/// context path, or a variant that does not carry the feature.
pub fn resolve_parameter<'a>(
    kb: &'a dyn KnowledgeBase,
    owner: &VariantId,
    parameter: &RelationParameter,
) -> ResolutionResult<ResolvedParameter<'a>> {
    match parameter {
        RelationParameter::Constant { value } => kb
            .feature_value(value)
            .cloned()
            .map(ResolvedParameter::Value)
            .ok_or_else(|| ResolutionError::inconsistent(format!("unknown feature value '{value}'"))),
        RelationParameter::Variable { feature, context_path } => {
            let variant = validate_context_path(kb, owner, context_path)?;
            if !kb.features(&variant).contains(feature) {
                return Err(ResolutionError::inconsistent(format!(
                    "variant '{variant}' does not carry feature '{feature}'"
                )));
            }
            let feature = kb
                .feature(feature)
                .ok_or_else(|| ResolutionError::inconsistent(format!("unknown feature '{feature}'")))?;
            Ok(ResolvedParameter::Feature { variant, feature })
        }
    }
}

fn check_operand_types(left: ValueType, operator: Operator, right: ValueType) -> ResolutionResult<()> {
    let strings_ordered = operator.is_ordering() && (left == ValueType::String || right == ValueType::String);
    if !compatible(left, right) || strings_ordered {
        return Err(ResolutionError::TypeMismatch {
            left: left.to_string(),
            right: format!("{right} under {operator}"),
        });
    }
    Ok(())
}

/// Evaluates `left <operator> right`.
///
/// Integer and Float operands compare by magnitude, so `3 == 3.0`. Strings
/// only support `EQ` and `NEQ`.
///
/// # Errors
/// `TypeMismatch` when the operand types are incompatible or when an
/// ordering operator is applied to strings.
///
/// ```
/// use kyroconf::knowledge_base::Operator;
/// use kyroconf::relation::evaluate;
/// use kyroconf::value::{FeatureValue, ValueType};
///
/// let three = FeatureValue::new("a", "f", ValueType::Integer, "3");
/// let three_f = FeatureValue::new("b", "g", ValueType::Float, "3.0");
/// assert!(evaluate(&three, Operator::Eq, &three_f).unwrap());
/// ```
pub fn evaluate(left: &FeatureValue, operator: Operator, right: &FeatureValue) -> ResolutionResult<bool> {
    check_operand_types(left.value_type, operator, right.value_type)?;
    Ok(operator.holds(compare(left, right)?))
}

/// Ids of the `candidates` that satisfy the relation against `fixed`.
///
/// `open_on_left` tells which side of the operator the candidates stand on.
pub fn filter_candidates(
    candidates: &[FeatureValue],
    operator: Operator,
    fixed: &FeatureValue,
    open_on_left: bool,
) -> ResolutionResult<Vec<FeatureValueId>> {
    let mut keep = Vec::new();
    for candidate in candidates {
        let holds = if open_on_left {
            evaluate(candidate, operator, fixed)?
        } else {
            evaluate(fixed, operator, candidate)?
        };
        if holds {
            keep.push(candidate.id.clone());
        }
    }
    Ok(keep)
}

/// State of one relation side at a concrete instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Value is known.
    Fixed(FeatureValue),
    /// Feature is still an open choice on the entity at the path.
    Open { at: EntityPath, feature: FeatureId },
    /// Entity is not materialized, or the feature has neither value nor choice.
    Unknown,
}

/// Locates `parameter` relative to the owner instance at `instance`.
#[must_use]
pub fn operand(knowledge: &Knowledge, instance: &[usize], parameter: &RelationParameter, resolved: &ResolvedParameter<'_>) -> Operand {
    let (RelationParameter::Variable { context_path, .. }, ResolvedParameter::Feature { feature, .. }) =
        (parameter, resolved)
    else {
        return match resolved {
            ResolvedParameter::Value(value) => Operand::Fixed(value.clone()),
            ResolvedParameter::Feature { .. } => Operand::Unknown,
        };
    };

    let Walk::Found(at) = knowledge.walk(instance, &context_path.steps()) else {
        return Operand::Unknown;
    };
    let Some(entity) = knowledge.entity(&at) else {
        return Operand::Unknown;
    };
    if let Some(value) = entity.applied_value(&feature.id) {
        return Operand::Fixed(value.clone());
    }
    if entity.feature_choice(&feature.id).is_some() {
        return Operand::Open {
            at,
            feature: feature.id.clone(),
        };
    }
    Operand::Unknown
}

fn apply_relation(
    knowledge: &mut Knowledge,
    instance: &[usize],
    relation: &Relation,
    left: &ResolvedParameter<'_>,
    right: &ResolvedParameter<'_>,
    warnings: &mut Vec<String>,
) -> ResolutionResult<usize> {
    let lhs = operand(knowledge, instance, &relation.left, left);
    let rhs = operand(knowledge, instance, &relation.right, right);

    let (at, feature, fixed, open_on_left) = match (lhs, rhs) {
        (Operand::Fixed(a), Operand::Fixed(b)) => {
            if evaluate(&a, relation.operator, &b)? {
                return Ok(0);
            }
            return Err(ResolutionError::invalid_decision(format!(
                "relation '{}' violated: {a} {} {b}",
                relation.id, relation.operator
            )));
        }
        (Operand::Fixed(a), Operand::Open { at, feature }) => (at, feature, a, false),
        (Operand::Open { at, feature }, Operand::Fixed(b)) => (at, feature, b, true),
        _ => return Ok(0),
    };

    let entity = knowledge.require_entity_mut(&at)?;
    let candidates = entity
        .feature_choice(&feature)
        .map(|c| c.values.clone())
        .unwrap_or_default();
    let keep = filter_candidates(&candidates, relation.operator, &fixed, open_on_left)?;
    let report = restrict_feature_choice(entity, &feature, &keep);
    if report.emptied > 0 {
        let message = format!(
            "relation '{}' leaves no legal value for feature '{feature}' of '{}'",
            relation.id, entity.variant
        );
        warn!(relation = %relation.id, feature = %feature, "feature choice emptied by relation");
        warnings.push(message);
    }
    Ok(report.removed)
}

/// Applies every relation attached to a materialized variant.
///
/// Returns how many candidate values were filtered out.
///
/// # Errors
/// - `InvalidDecision` if two fixed values violate a relation
/// - `TypeMismatch` if a relation compares incompatible types
/// - `InconsistentKnowledgeBase` for unknown relations or invalid paths
pub fn apply_relations(
    kb: &dyn KnowledgeBase,
    knowledge: &mut Knowledge,
    warnings: &mut Vec<String>,
) -> ResolutionResult<usize> {
    let mut removed = 0;
    for instance in knowledge.paths() {
        let Some(variant) = knowledge.entity(&instance).map(|e| e.variant.clone()) else {
            continue;
        };
        for id in kb.attached_relations(&variant) {
            let relation = kb
                .relation(id)
                .ok_or_else(|| ResolutionError::inconsistent(format!("unknown relation '{id}'")))?;
            let left = resolve_parameter(kb, &relation.variant, &relation.left)?;
            let right = resolve_parameter(kb, &relation.variant, &relation.right)?;
            check_operand_types(left.value_type(), relation.operator, right.value_type())?;
            removed += apply_relation(knowledge, &instance, relation, &left, &right, warnings)?;
        }
    }
    Ok(removed)
}
