use crate::choices::materialize;
use crate::error::{ResolutionError, ResolutionResult};
use crate::knowledge::{Decision, Knowledge};
use crate::relation::apply_relations;

use super::{ResolutionContext, Resolver};

/// First stage: materializes the variant picked for a purpose.
#[derive(Debug, Default, Clone, Copy)]
pub struct VariantDecisionResolver;

impl Resolver for VariantDecisionResolver {
    fn name(&self) -> &'static str {
        "variant_decision"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let Some(Decision::Variant { purpose, variant }) = decision else {
            return Ok(knowledge);
        };

        let parent = knowledge.find_variant_choice(purpose, variant).ok_or_else(|| {
            ResolutionError::unknown_choice(format!("variant '{variant}' for purpose '{purpose}'"))
        })?;

        let mut knowledge = knowledge;
        materialize(ctx.kb, &mut knowledge, &parent, purpose, variant, ctx.config)?;
        apply_relations(ctx.kb, &mut knowledge, &mut ctx.warnings)?;
        Ok(knowledge)
    }
}
