use crate::choices::{cleanup_feature_choices, prune_settled_concepts};
use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::{Decision, Knowledge};
use crate::relation::apply_relations;

use super::{ResolutionContext, Resolver};

/// Second stage: applies the value picked for a feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureDecisionResolver;

impl Resolver for FeatureDecisionResolver {
    fn name(&self) -> &'static str {
        "feature_decision"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let Some(Decision::Feature { variant, feature, value }) = decision else {
            return Ok(knowledge);
        };
        let unknown = || ResolutionError::unknown_choice(format!("value '{value}' for feature '{feature}' of '{variant}'"));

        let at = knowledge.find_feature_choice(variant, feature, value).ok_or_else(unknown)?;
        let mut knowledge = knowledge;
        let entity = knowledge.require_entity_mut(&at)?;

        // range values only exist inside the choice, so take the value from there
        let chosen = entity
            .feature_choice(feature)
            .and_then(|c| c.values.iter().find(|v| &v.id == value))
            .cloned()
            .ok_or_else(unknown)?;
        entity.apply_value(chosen);
        cleanup_feature_choices(entity, Some(variant), Some(feature), None);
        prune_settled_concepts(ctx.kb, entity)?;

        apply_relations(ctx.kb, &mut knowledge, &mut ctx.warnings)?;
        Ok(knowledge)
    }
}
