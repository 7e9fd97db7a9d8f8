use tracing::debug;

use crate::choices::materialize;
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{PurposeId, VariantId};
use crate::knowledge::{Decision, EntityPath, Knowledge};
use crate::knowledge_base::KnowledgeBase;
use crate::relation::apply_relations;

use super::{ResolutionContext, Resolver};

/// Open variant choices that need no client input: the purpose has exactly
/// one candidate in the catalog and that candidate is still open.
fn forced_choices(kb: &dyn KnowledgeBase, knowledge: &Knowledge) -> Vec<(EntityPath, PurposeId, VariantId)> {
    let mut forced = Vec::new();
    for parent in std::iter::once(Vec::new()).chain(knowledge.paths()) {
        let Some(choices) = knowledge.variant_choices(&parent) else {
            continue;
        };
        for choice in choices {
            if let [only] = kb.fulfills(&choice.purpose) {
                if choice.variants.contains(only) {
                    forced.push((parent.clone(), choice.purpose.clone(), only.clone()));
                }
            }
        }
    }
    forced
}

/// Fourth stage: materializes single-candidate purposes down to a fixed point.
///
/// Each round materializes one more tree level, so the number of rounds is
/// bounded by the configured depth. A Constitutes cycle is caught by
/// [`materialize`] and reported as `InconsistentKnowledgeBase`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoCompletion;

impl Resolver for AutoCompletion {
    fn name(&self) -> &'static str {
        "auto_completion"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        _decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let depth = ctx.config.max_autocompletion_depth;
        let mut knowledge = knowledge;
        let mut materialized = 0usize;

        for _ in 0..=depth {
            let forced = forced_choices(ctx.kb, &knowledge);
            if forced.is_empty() {
                if materialized > 0 {
                    debug!(materialized, "auto-completion reached a fixed point");
                    apply_relations(ctx.kb, &mut knowledge, &mut ctx.warnings)?;
                }
                return Ok(knowledge);
            }
            for (parent, purpose, variant) in forced {
                materialize(ctx.kb, &mut knowledge, &parent, &purpose, &variant, ctx.config)?;
                materialized += 1;
            }
        }

        Err(ResolutionError::inconsistent(format!(
            "auto-completion did not reach a fixed point within depth {depth}"
        )))
    }
}
