//! Choice bookkeeping for knowledge entities.
//!
//! New choices are computed once, when a variant is materialized. After that
//! choices only ever shrink: decisions, events and relations remove
//! candidates through the `cleanup_*` functions.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResolutionConfig;
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{ConceptId, FeatureId, FeatureValueId, PurposeId, VariantId};
use crate::knowledge::{ConceptChoice, EntityPath, FeatureChoice, Knowledge, KnowledgeEntity, VariantChoice};
use crate::knowledge_base::{Concept, FeatureDomain, KnowledgeBase};
use crate::value::FeatureValue;

/// What a cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleanup {
    /// Candidates or whole choices removed.
    pub removed: usize,
    /// Choices dropped because their last candidate was removed.
    pub emptied: usize,
}

impl Cleanup {
    fn merge(&mut self, other: Self) {
        self.removed += other.removed;
        self.emptied += other.emptied;
    }
}

/// Whether a concept can still be applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptStatus {
    /// Some values are still open and none conflict.
    Possible,
    /// Every value is already applied.
    Fulfilled,
    /// A value conflicts or can no longer be chosen.
    Impossible,
}

/// Variant choice for `purpose`, or an error if nothing fulfills it.
pub fn variant_choice_for(kb: &dyn KnowledgeBase, purpose: &PurposeId) -> ResolutionResult<VariantChoice> {
    let variants = kb.fulfills(purpose);
    let first = variants.first().ok_or_else(|| {
        ResolutionError::inconsistent(format!("purpose '{purpose}' is not fulfilled by any variant"))
    })?;
    Ok(VariantChoice {
        purpose: purpose.clone(),
        variants: variants.to_vec(),
        quantity: kb.quantity(purpose, first),
    })
}

/// One variant choice per root purpose.
pub fn root_variant_choices(kb: &dyn KnowledgeBase) -> ResolutionResult<Vec<VariantChoice>> {
    kb.root_purposes().iter().map(|p| variant_choice_for(kb, p)).collect()
}

/// One variant choice per purpose `variant` is constituted by.
pub fn new_variant_choices(kb: &dyn KnowledgeBase, variant: &VariantId) -> ResolutionResult<Vec<VariantChoice>> {
    kb.constitutes(variant).iter().map(|p| variant_choice_for(kb, p)).collect()
}

/// One feature choice per feature `variant` carries.
///
/// Ranged features generating more than `max_range_values` values fail with
/// `InvalidRange`, whatever limit the knowledge base applies itself.
pub fn new_feature_choices(
    kb: &dyn KnowledgeBase,
    variant: &VariantId,
    max_range_values: usize,
) -> ResolutionResult<Vec<FeatureChoice>> {
    kb.features(variant)
        .iter()
        .map(|feature| {
            let values = kb.feature_values(variant, feature)?;
            let ranged = kb
                .feature(feature)
                .is_some_and(|f| matches!(f.domain, FeatureDomain::Range { .. }));
            if ranged && values.len() > max_range_values {
                return Err(ResolutionError::InvalidRange {
                    feature: feature.to_string(),
                    reason: format!("more than {max_range_values} values"),
                });
            }
            Ok(FeatureChoice {
                variant: variant.clone(),
                feature: feature.clone(),
                values,
            })
        })
        .collect()
}

/// A single concept choice listing every attached concept, if there are any.
#[must_use]
pub fn new_concept_choices(kb: &dyn KnowledgeBase, variant: &VariantId) -> Vec<ConceptChoice> {
    let concepts = kb.attached_concepts(variant);
    if concepts.is_empty() {
        return Vec::new();
    }
    vec![ConceptChoice {
        variant: variant.clone(),
        concepts: concepts.to_vec(),
    }]
}

/// Removes variant choices, or single candidates when `variant` is given.
///
/// `None` filters match anything.
pub fn cleanup_variant_choices(
    choices: &mut Vec<VariantChoice>,
    purpose: Option<&PurposeId>,
    variant: Option<&VariantId>,
) -> Cleanup {
    let mut report = Cleanup::default();
    choices.retain_mut(|choice| {
        if purpose.is_some_and(|p| p != &choice.purpose) {
            return true;
        }
        let Some(variant) = variant else {
            report.removed += 1;
            return false;
        };
        let before = choice.variants.len();
        choice.variants.retain(|v| v != variant);
        report.removed += before - choice.variants.len();
        if choice.variants.is_empty() {
            report.emptied += 1;
            return false;
        }
        true
    });
    report
}

/// Removes feature choices, or single values when `value` is given.
pub fn cleanup_feature_choices(
    entity: &mut KnowledgeEntity,
    variant: Option<&VariantId>,
    feature: Option<&FeatureId>,
    value: Option<&FeatureValueId>,
) -> Cleanup {
    let mut report = Cleanup::default();
    entity.feature_choices.retain_mut(|choice| {
        if variant.is_some_and(|v| v != &choice.variant) || feature.is_some_and(|f| f != &choice.feature) {
            return true;
        }
        let Some(value) = value else {
            report.removed += 1;
            return false;
        };
        let before = choice.values.len();
        choice.values.retain(|v| &v.id != value);
        report.removed += before - choice.values.len();
        if choice.values.is_empty() {
            report.emptied += 1;
            return false;
        }
        true
    });
    report
}

/// Removes concept choices, or the listed concepts when `concepts` is given.
pub fn cleanup_concept_choices(
    entity: &mut KnowledgeEntity,
    variant: Option<&VariantId>,
    concepts: Option<&[ConceptId]>,
) -> Cleanup {
    let mut report = Cleanup::default();
    entity.concept_choices.retain_mut(|choice| {
        if variant.is_some_and(|v| v != &choice.variant) {
            return true;
        }
        let Some(concepts) = concepts else {
            report.removed += 1;
            return false;
        };
        let before = choice.concepts.len();
        choice.concepts.retain(|c| !concepts.contains(c));
        report.removed += before - choice.concepts.len();
        if choice.concepts.is_empty() {
            report.emptied += 1;
            return false;
        }
        true
    });
    report
}

/// Keeps only `keep` among the values offered for `feature`.
pub fn restrict_feature_choice(entity: &mut KnowledgeEntity, feature: &FeatureId, keep: &[FeatureValueId]) -> Cleanup {
    let drop: Vec<FeatureValueId> = entity
        .feature_choice(feature)
        .map(|c| c.values.iter().filter(|v| !keep.contains(&v.id)).map(|v| v.id.clone()).collect())
        .unwrap_or_default();
    let mut report = Cleanup::default();
    for value in &drop {
        report.merge(cleanup_feature_choices(entity, None, Some(feature), Some(value)));
    }
    report
}

/// Classifies `concept` against the values already applied to `entity`.
///
/// A concept is impossible once the entity carries a different value for one
/// of its features, or once nothing still offered for an unapplied feature
/// has the magnitude of the concept's value. Values are matched by magnitude,
/// so a concept value authored next to a generated range still counts as
/// offered.
pub fn check_concept(
    kb: &dyn KnowledgeBase,
    entity: &KnowledgeEntity,
    concept: &Concept,
) -> ResolutionResult<ConceptStatus> {
    let mut fulfilled = true;
    for id in &concept.values {
        let value = kb
            .feature_value(id)
            .ok_or_else(|| ResolutionError::inconsistent(format!("concept '{}' references unknown value '{id}'", concept.id)))?;
        match entity.applied_value(&value.feature) {
            Some(applied) if applied.id == value.id || applied.same_value(value)? => {}
            Some(_) => return Ok(ConceptStatus::Impossible),
            None => {
                if !offers_magnitude(entity, value)? {
                    return Ok(ConceptStatus::Impossible);
                }
                fulfilled = false;
            }
        }
    }
    Ok(if fulfilled {
        ConceptStatus::Fulfilled
    } else {
        ConceptStatus::Possible
    })
}

fn offers_magnitude(entity: &KnowledgeEntity, value: &FeatureValue) -> ResolutionResult<bool> {
    let Some(choice) = entity.feature_choice(&value.feature) else {
        return Ok(false);
    };
    for offered in &choice.values {
        if offered.id == value.id || offered.same_value(value)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Drops concepts of the entity's concept choices that are now fulfilled or impossible.
pub fn prune_settled_concepts(kb: &dyn KnowledgeBase, entity: &mut KnowledgeEntity) -> ResolutionResult<Cleanup> {
    let mut settled = Vec::new();
    for choice in &entity.concept_choices {
        for id in &choice.concepts {
            let concept = kb
                .concept(id)
                .ok_or_else(|| ResolutionError::inconsistent(format!("unknown concept '{id}'")))?;
            if check_concept(kb, entity, concept)? != ConceptStatus::Possible {
                settled.push(id.clone());
            }
        }
    }
    if settled.is_empty() {
        return Ok(Cleanup::default());
    }
    Ok(cleanup_concept_choices(entity, None, Some(&settled)))
}

/// Materializes `variant` for `purpose` under `parent` and consumes the parent's choice.
///
/// Fails with `InconsistentKnowledgeBase` if `variant` already occurs among the
/// ancestors (a Constitutes cycle) or the tree would exceed
/// `max_autocompletion_depth`, and with `InvalidRange` if one of its ranged
/// features exceeds `max_range_values`.
pub fn materialize(
    kb: &dyn KnowledgeBase,
    knowledge: &mut Knowledge,
    parent: &[usize],
    purpose: &PurposeId,
    variant: &VariantId,
    limits: &ResolutionConfig,
) -> ResolutionResult<EntityPath> {
    let max_depth = limits.max_autocompletion_depth;
    if parent.len() >= max_depth {
        return Err(ResolutionError::inconsistent(format!(
            "materializing '{variant}' for '{purpose}' exceeds depth {max_depth}"
        )));
    }
    if knowledge.ancestry(parent).contains(variant) {
        return Err(ResolutionError::inconsistent(format!(
            "constitutes cycle: '{variant}' is its own ancestor"
        )));
    }
    if kb.variant(variant).is_none() {
        return Err(ResolutionError::inconsistent(format!("unknown variant '{variant}'")));
    }

    let mut entity = KnowledgeEntity::new(purpose.clone(), variant.clone(), kb.quantity(purpose, variant));
    entity.variant_choices = new_variant_choices(kb, variant)?;
    entity.feature_choices = new_feature_choices(kb, variant, limits.max_range_values)?;
    entity.concept_choices = new_concept_choices(kb, variant);

    let choices = knowledge
        .variant_choices_mut(parent)
        .ok_or_else(|| ResolutionError::internal(format!("no parent at {parent:?}")))?;
    cleanup_variant_choices(choices, Some(purpose), None);

    let children = knowledge
        .children_mut(parent)
        .ok_or_else(|| ResolutionError::internal(format!("no parent at {parent:?}")))?;
    children.push(entity);

    let mut path = parent.to_vec();
    path.push(children.len() - 1);
    debug!(purpose = %purpose, variant = %variant, depth = path.len(), "materialized knowledge entity");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::knowledge_base::InMemoryKnowledgeBase;
    use crate::value::ValueType;

    fn kb() -> InMemoryKnowledgeBase {
        let doc = json!({
            "purposes": [{"id": "vehicle", "is_root": true}, {"id": "engine"}, {"id": "paint"}],
            "variants": [
                {"id": "car", "features": ["colour", "seats"]},
                {"id": "v6"}, {"id": "v8"}, {"id": "gloss"}
            ],
            "features": [
                {"id": "colour", "value_type": "string", "domain": {"kind": "values", "values": ["red", "blue"]}},
                {"id": "seats", "value_type": "integer", "domain": {"kind": "range", "min": "2", "max": "7"}}
            ],
            "feature_values": [
                {"id": "red", "feature": "colour", "value_type": "string", "value": "red"},
                {"id": "blue", "feature": "colour", "value_type": "string", "value": "blue"},
                {"id": "seats-5", "feature": "seats", "value_type": "integer", "value": "5"}
            ],
            "concepts": [
                {"id": "family", "variant": "car", "values": ["blue", "seats-5"]},
                {"id": "sport", "variant": "car", "values": ["red"]}
            ],
            "fulfills": [
                {"purpose": "vehicle", "variants": ["car"]},
                {"purpose": "engine", "variants": ["v6", "v8"], "quantity": 2},
                {"purpose": "paint", "variants": ["gloss"]}
            ],
            "constitutes": [{"variant": "car", "purposes": ["engine", "paint"]}]
        });
        InMemoryKnowledgeBase::from_json(&doc.to_string()).unwrap()
    }

    fn limits(depth: usize) -> ResolutionConfig {
        ResolutionConfig {
            max_autocompletion_depth: depth,
            ..ResolutionConfig::default()
        }
    }

    fn car(kb: &InMemoryKnowledgeBase) -> KnowledgeEntity {
        let mut k = Knowledge {
            root_choices: root_variant_choices(kb).unwrap(),
            ..Knowledge::default()
        };
        let path = materialize(kb, &mut k, &[], &"vehicle".into(), &"car".into(), &limits(8)).unwrap();
        k.entity(&path).unwrap().clone()
    }

    #[test]
    fn new_choices_follow_the_catalog() {
        let kb = kb();
        let car = car(&kb);
        assert_eq!(car.variant_choices.len(), 2);
        assert_eq!(car.variant_choices[0].variants.len(), 2);
        assert_eq!(car.variant_choices[0].quantity, 2);
        assert_eq!(car.feature_choices.len(), 2);
        assert_eq!(car.feature_choice(&"seats".into()).unwrap().values.len(), 6);
        assert_eq!(car.concept_choices.len(), 1);
        assert_eq!(car.concept_choices[0].concepts.len(), 2);
    }

    #[test]
    fn materialize_consumes_parent_choice() {
        let kb = kb();
        let mut k = Knowledge {
            root_choices: root_variant_choices(&kb).unwrap(),
            ..Knowledge::default()
        };
        let path = materialize(&kb, &mut k, &[], &"vehicle".into(), &"car".into(), &limits(8)).unwrap();
        assert_eq!(path, vec![0]);
        assert!(k.root_choices.is_empty());

        let child = materialize(&kb, &mut k, &path, &"engine".into(), &"v8".into(), &limits(8)).unwrap();
        assert_eq!(child, vec![0, 0]);
        assert_eq!(k.entity(&child).unwrap().quantity, 2);
        assert!(k.entity(&path).unwrap().variant_choice(&"engine".into()).is_none());
    }

    #[test]
    fn materialize_rejects_cycles_and_depth() {
        let kb = kb();
        let mut k = Knowledge::default();
        let path = materialize(&kb, &mut k, &[], &"vehicle".into(), &"car".into(), &limits(8)).unwrap();
        let err = materialize(&kb, &mut k, &path, &"engine".into(), &"car".into(), &limits(8)).unwrap_err();
        assert!(matches!(err, ResolutionError::InconsistentKnowledgeBase { .. }));

        let err = materialize(&kb, &mut k, &path, &"engine".into(), &"v8".into(), &limits(1)).unwrap_err();
        assert!(matches!(err, ResolutionError::InconsistentKnowledgeBase { .. }));
    }

    #[test]
    fn materialize_caps_generated_ranges() {
        let kb = kb();
        let mut k = Knowledge {
            root_choices: root_variant_choices(&kb).unwrap(),
            ..Knowledge::default()
        };
        let tight = ResolutionConfig {
            max_range_values: 5,
            ..ResolutionConfig::default()
        };
        // seats spans 2..=7, one value over the cap
        let err = materialize(&kb, &mut k, &[], &"vehicle".into(), &"car".into(), &tight).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidRange { ref feature, .. } if feature == "seats"));
        assert!(k.roots.is_empty());
    }

    #[test]
    fn variant_cleanup_filters() {
        let kb = kb();
        let mut choices = car(&kb).variant_choices;
        let report = cleanup_variant_choices(&mut choices, Some(&"engine".into()), Some(&"v6".into()));
        assert_eq!(report, Cleanup { removed: 1, emptied: 0 });
        assert_eq!(choices[0].variants, vec![VariantId::new("v8")]);

        let report = cleanup_variant_choices(&mut choices, None, Some(&"gloss".into()));
        assert_eq!(report.emptied, 1);
        assert_eq!(choices.len(), 1);

        let report = cleanup_variant_choices(&mut choices, None, None);
        assert_eq!(report.removed, 1);
        assert!(choices.is_empty());
    }

    #[test]
    fn feature_cleanup_and_restrict() {
        let kb = kb();
        let mut car = car(&kb);
        let report = cleanup_feature_choices(&mut car, None, Some(&"colour".into()), Some(&"red".into()));
        assert_eq!(report.removed, 1);
        assert_eq!(car.feature_choice(&"colour".into()).unwrap().values.len(), 1);

        let report = restrict_feature_choice(&mut car, &"seats".into(), &["seats=4".into()]);
        assert_eq!(report.removed, 5);
        assert_eq!(car.feature_choice(&"seats".into()).unwrap().values.len(), 1);

        cleanup_feature_choices(&mut car, Some(&"car".into()), None, None);
        assert!(car.feature_choices.is_empty());
    }

    #[test]
    fn concept_status_transitions() {
        let kb = kb();
        let mut car = car(&kb);
        let family = kb.concept(&"family".into()).unwrap();
        let sport = kb.concept(&"sport".into()).unwrap();

        // seats-5 is authored next to the generated range and matches seats=5
        assert_eq!(check_concept(&kb, &car, family).unwrap(), ConceptStatus::Possible);
        assert_eq!(check_concept(&kb, &car, sport).unwrap(), ConceptStatus::Possible);

        let mut narrowed = car.clone();
        restrict_feature_choice(&mut narrowed, &"seats".into(), &["seats=4".into(), "seats=6".into()]);
        assert_eq!(check_concept(&kb, &narrowed, family).unwrap(), ConceptStatus::Impossible);

        car.apply_value(FeatureValue::new("blue", "colour", ValueType::String, "blue"));
        assert_eq!(check_concept(&kb, &car, sport).unwrap(), ConceptStatus::Impossible);

        car.apply_value(FeatureValue::new("red", "colour", ValueType::String, "red"));
        assert_eq!(check_concept(&kb, &car, sport).unwrap(), ConceptStatus::Fulfilled);

        car.apply_value(FeatureValue::new("seats=5", "seats", ValueType::Integer, "5.0"));
        car.apply_value(FeatureValue::new("blue", "colour", ValueType::String, "blue"));
        assert_eq!(check_concept(&kb, &car, family).unwrap(), ConceptStatus::Fulfilled);

        let report = prune_settled_concepts(&kb, &mut car).unwrap();
        assert_eq!(report.removed, 2);
        assert!(car.concept_choices.is_empty());
    }
}
