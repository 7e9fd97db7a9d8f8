//! The resolver pipeline.
//!
//! A decision runs through six stages in a fixed order. Every stage takes
//! ownership of the working [`Knowledge`] and hands back the next version;
//! a stage with nothing to do for the decision returns its input unchanged.
//! The first error aborts the run. Callers work on a clone of the session's
//! knowledge and handler and only commit both when [`Pipeline::run`]
//! succeeds.

mod autocomplete;
mod concept;
mod event;
mod feature;
mod rules;
mod variant;

use tracing::{debug, warn};

use crate::config::ResolutionConfig;
use crate::error::ResolutionResult;
use crate::knowledge::{Decision, Knowledge};
use crate::knowledge_base::KnowledgeBase;
use crate::rules_events::RulesAndEventsHandler;
use crate::session::Metadata;

pub use autocomplete::AutoCompletion;
pub use concept::ConceptDecisionResolver;
pub use event::{event_outcome, EventOutcome, EventResolver};
pub use feature::FeatureDecisionResolver;
pub use rules::RulesResolver;
pub use variant::VariantDecisionResolver;

/// Everything a stage may read or update besides the knowledge itself.
pub struct ResolutionContext<'a> {
    pub kb: &'a dyn KnowledgeBase,
    pub handler: &'a mut RulesAndEventsHandler,
    pub metadata: &'a Metadata,
    pub config: &'a ResolutionConfig,
    /// Warnings raised during this run, without duplicates.
    pub warnings: Vec<String>,
}

impl<'a> ResolutionContext<'a> {
    #[must_use]
    pub fn new(
        kb: &'a dyn KnowledgeBase,
        handler: &'a mut RulesAndEventsHandler,
        metadata: &'a Metadata,
        config: &'a ResolutionConfig,
    ) -> Self {
        Self {
            kb,
            handler,
            metadata,
            config,
            warnings: Vec::new(),
        }
    }

    /// Records a warning for the response.
    pub fn warn(&mut self, message: impl Into<String>) {
        push_warning(&mut self.warnings, message.into());
    }

    /// Warnings raised by the stages and by the handler.
    #[must_use]
    pub fn into_warnings(self) -> Vec<String> {
        let mut warnings = self.warnings;
        for message in self.handler.drain_warnings() {
            push_warning(&mut warnings, message);
        }
        warnings
    }
}

pub(crate) fn push_warning(warnings: &mut Vec<String>, message: String) {
    if !warnings.contains(&message) {
        warn!(warning = %message, "resolution warning");
        warnings.push(message);
    }
}

/// One stage of the pipeline.
pub trait Resolver: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Applies the stage to `knowledge`.
    ///
    /// `decision` is `None` when a session is being initialized.
    ///
    /// # Errors
    /// Any [`crate::ResolutionError`]; the run is aborted.
    fn resolve(
        &self,
        knowledge: Knowledge,
        decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge>;
}

/// Ordered list of resolver stages.
pub struct Pipeline {
    stages: Vec<Box<dyn Resolver>>,
}

impl Pipeline {
    /// The full decision pipeline.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Box::new(VariantDecisionResolver),
            Box::new(FeatureDecisionResolver),
            Box::new(ConceptDecisionResolver),
            Box::new(AutoCompletion),
            Box::new(EventResolver),
            Box::new(RulesResolver),
        ])
    }

    /// Stages run when a session is created.
    #[must_use]
    pub fn initial() -> Self {
        Self::with_stages(vec![
            Box::new(AutoCompletion),
            Box::new(EventResolver),
            Box::new(RulesResolver),
        ])
    }

    #[must_use]
    pub fn with_stages(stages: Vec<Box<dyn Resolver>>) -> Self {
        Self { stages }
    }

    /// Stage names in run order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage, then rebuilds the flattened choice list.
    ///
    /// The handler's journal is cleared first so stages can tell which
    /// transitions happened during this run.
    pub fn run(
        &self,
        knowledge: Knowledge,
        decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        ctx.handler.clear_journal();
        let mut knowledge = knowledge;
        for stage in &self.stages {
            debug!(stage = stage.name(), "running resolver stage");
            knowledge = stage.resolve(knowledge, decision, ctx)?;
        }
        knowledge.refresh_choices();
        Ok(knowledge)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Re-applies rule conclusions and re-evaluates events until no event or
/// rule changes state.
///
/// Every round moves at least one entry out of `Possible`, so the loop is
/// bounded by the handler's size.
pub(crate) fn settle(
    kb: &dyn KnowledgeBase,
    knowledge: &mut Knowledge,
    handler: &mut RulesAndEventsHandler,
    warnings: &mut Vec<String>,
) -> ResolutionResult<()> {
    let bound = handler.event_count() + handler.rule_count() + 1;
    for _ in 0..bound {
        let before = handler.journal().len();
        rules::enforce_conclusions(kb, knowledge, handler, warnings)?;
        event::evaluate_events(kb, knowledge, handler)?;
        if handler.journal().len() == before {
            break;
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::Harness;
    use super::*;
    use crate::rules_events::Standing;

    #[test]
    fn stage_order_is_fixed() {
        assert_eq!(
            Pipeline::standard().stage_names(),
            [
                "variant_decision",
                "feature_decision",
                "concept_decision",
                "auto_completion",
                "event",
                "rules"
            ]
        );
        assert_eq!(Pipeline::initial().stage_names(), ["auto_completion", "event", "rules"]);
    }

    #[test]
    fn initial_run_completes_single_candidate_purposes() {
        let h = Harness::new();
        // car, frame and the rigid axle are the only candidates for their purposes
        assert_eq!(h.knowledge.entity_count(), 3);
        assert!(h.knowledge.root_choices.is_empty());
        assert!(!h.knowledge.is_complete());
    }

    #[test]
    fn rules_chain_from_a_decision() {
        let mut h = Harness::new();
        h.select(&Decision::feature("car", "colour", "red")).unwrap();

        assert_eq!(h.handler.event_standing(&"car-is-red".into()), Some(Standing::Triggered));
        assert_eq!(h.handler.rule_standing(&"red-needs-v8".into()), Some(Standing::Triggered));
        assert_eq!(h.handler.event_standing(&"car-has-v8".into()), Some(Standing::Triggered));
        // green is no longer possible, so the negated event holds
        assert_eq!(h.handler.event_standing(&"car-not-green".into()), Some(Standing::Triggered));

        let engine = h.knowledge.roots[0].variant_choice(&"engine".into()).unwrap();
        assert_eq!(engine.variants, vec!["v8".into()]);
    }

    #[test]
    fn unknown_value_is_rejected_without_change() {
        let mut h = Harness::new();
        let before = h.knowledge.clone();
        let err = h.select(&Decision::feature("car", "colour", "purple")).unwrap_err();
        assert!(matches!(err, crate::ResolutionError::UnknownChoice { .. }));
        assert_eq!(h.knowledge, before);
    }

    #[test]
    fn warnings_are_deduplicated() {
        let mut warnings = Vec::new();
        push_warning(&mut warnings, "x".into());
        push_warning(&mut warnings, "x".into());
        assert_eq!(warnings.len(), 1);
    }
}
