use crate::choices::{check_concept, cleanup_concept_choices, cleanup_feature_choices, prune_settled_concepts, ConceptStatus};
use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::{Decision, Knowledge};
use crate::relation::apply_relations;

use super::{ResolutionContext, Resolver};

/// Third stage: applies every value of the picked concept at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConceptDecisionResolver;

impl Resolver for ConceptDecisionResolver {
    fn name(&self) -> &'static str {
        "concept_decision"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let Some(Decision::Concept { variant, concept }) = decision else {
            return Ok(knowledge);
        };

        let at = knowledge
            .find_concept_choice(variant, concept)
            .ok_or_else(|| ResolutionError::unknown_choice(format!("concept '{concept}' for '{variant}'")))?;
        let definition = ctx
            .kb
            .concept(concept)
            .ok_or_else(|| ResolutionError::inconsistent(format!("unknown concept '{concept}'")))?;

        let mut knowledge = knowledge;
        let entity = knowledge.require_entity_mut(&at)?;
        if check_concept(ctx.kb, entity, definition)? == ConceptStatus::Impossible {
            return Err(ResolutionError::invalid_decision(format!(
                "concept '{concept}' conflicts with the values of '{variant}'"
            )));
        }

        for id in &definition.values {
            let value = ctx.kb.feature_value(id).ok_or_else(|| {
                ResolutionError::inconsistent(format!("concept '{concept}' references unknown value '{id}'"))
            })?;
            entity.apply_value(value.clone());
            cleanup_feature_choices(entity, None, Some(&value.feature), None);
        }
        if !entity.concepts.contains(concept) {
            entity.concepts.push(concept.clone());
        }
        cleanup_concept_choices(entity, None, Some(std::slice::from_ref(concept)));
        prune_settled_concepts(ctx.kb, entity)?;

        apply_relations(ctx.kb, &mut knowledge, &mut ctx.warnings)?;
        Ok(knowledge)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::Harness;
    use super::*;

    #[test]
    fn applies_all_values_and_prunes_concepts() {
        let mut h = Harness::new();
        h.select(&Decision::concept("car", "family")).unwrap();

        let car = &h.knowledge.roots[0];
        assert_eq!(car.applied_value(&"colour".into()).unwrap().id.as_str(), "blue");
        assert_eq!(car.applied_value(&"seats".into()).unwrap().id.as_str(), "s5");
        assert!(car.feature_choices.is_empty());
        assert!(car.concept_choices.is_empty());
        assert_eq!(car.concepts, vec!["family".into()]);
    }

    #[test]
    fn impossible_concept_is_invalid_decision() {
        let mut h = Harness::new();
        // keep roadster offered while making it impossible
        h.knowledge.roots[0].apply_value(crate::value::FeatureValue::new(
            "blue",
            "colour",
            crate::value::ValueType::String,
            "blue",
        ));
        let err = h.select(&Decision::concept("car", "roadster")).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidDecision { .. }));
    }

    #[test]
    fn concept_not_offered_is_unknown_choice() {
        let mut h = Harness::new();
        h.select(&Decision::concept("car", "family")).unwrap();
        let err = h.select(&Decision::concept("car", "family")).unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownChoice { .. }));
    }
}
