//! Event evaluation.
//!
//! Every `Possible` event owned by a materialized variant is checked against
//! the tree: it becomes `Triggered` once its selection has happened at some
//! instance of the owner, and `Obsolete` once the selection can no longer
//! happen at any instance. A negated event swaps the two.

use tracing::debug;

use crate::choices::{check_concept, ConceptStatus};
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{ConceptId, FeatureValueId, VariantId};
use crate::knowledge::{Decision, Knowledge, Walk};
use crate::knowledge_base::{Event, KnowledgeBase, TriggerType};
use crate::relation::validate_context_path;
use crate::rules_events::{RulesAndEventsHandler, Standing};

use super::{settle, ResolutionContext, Resolver};

/// Where an event stands against the current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The condition holds.
    Holds,
    /// Still undecided.
    Open,
    /// The condition can no longer hold.
    Impossible,
}

impl EventOutcome {
    const fn negated(self) -> Self {
        match self {
            Self::Holds => Self::Impossible,
            Self::Open => Self::Open,
            Self::Impossible => Self::Holds,
        }
    }
}

/// Outcome of the un-negated selection at the owner instance `instance`.
fn selection_at(
    kb: &dyn KnowledgeBase,
    knowledge: &Knowledge,
    instance: &[usize],
    event: &Event,
) -> ResolutionResult<EventOutcome> {
    let target = validate_context_path(kb, &event.variant, &event.context_path)?;
    if event.trigger_type == TriggerType::Variant && target.as_str() != event.trigger_id {
        return Err(ResolutionError::inconsistent(format!(
            "event '{}' observes variant '{}' but its path ends at '{target}'",
            event.id, event.trigger_id
        )));
    }

    let at = match knowledge.walk(instance, &event.context_path.steps()) {
        Walk::Found(at) => at,
        Walk::Pending => return Ok(EventOutcome::Open),
        Walk::Excluded => return Ok(EventOutcome::Impossible),
    };
    let entity = knowledge
        .entity(&at)
        .ok_or_else(|| ResolutionError::internal(format!("walk ended outside the tree at {at:?}")))?;

    match event.trigger_type {
        TriggerType::FeatureValue => {
            let id = FeatureValueId::new(event.trigger_id.as_str());
            if entity.values.iter().any(|v| v.id == id) {
                Ok(EventOutcome::Holds)
            } else if entity.feature_choices.iter().any(|c| c.offers(&id)) {
                Ok(EventOutcome::Open)
            } else {
                Ok(EventOutcome::Impossible)
            }
        }
        TriggerType::Concept => {
            let id = ConceptId::new(event.trigger_id.as_str());
            let concept = kb.concept(&id).ok_or_else(|| {
                ResolutionError::inconsistent(format!("event '{}' observes unknown concept '{id}'", event.id))
            })?;
            Ok(match check_concept(kb, entity, concept)? {
                ConceptStatus::Fulfilled => EventOutcome::Holds,
                ConceptStatus::Possible => EventOutcome::Open,
                ConceptStatus::Impossible => EventOutcome::Impossible,
            })
        }
        TriggerType::Variant => Ok(EventOutcome::Holds),
    }
}

/// Evaluates `event` across every instance of its owning variant.
///
/// The selection holds if it holds at any instance and is impossible once
/// it is impossible at all of them. `not_event` inverts the result.
///
/// # Errors
/// `InconsistentKnowledgeBase` for an invalid context path or unknown trigger.
pub fn event_outcome(kb: &dyn KnowledgeBase, knowledge: &Knowledge, event: &Event) -> ResolutionResult<EventOutcome> {
    let instances = knowledge.find_root(&event.variant);
    if instances.is_empty() {
        return Ok(EventOutcome::Open);
    }

    let mut all_impossible = true;
    let mut outcome = EventOutcome::Open;
    for instance in &instances {
        match selection_at(kb, knowledge, instance, event)? {
            EventOutcome::Holds => {
                outcome = EventOutcome::Holds;
                all_impossible = false;
                break;
            }
            EventOutcome::Open => all_impossible = false,
            EventOutcome::Impossible => {}
        }
    }
    if all_impossible {
        outcome = EventOutcome::Impossible;
    }

    Ok(if event.not_event { outcome.negated() } else { outcome })
}

fn materialized_variants(knowledge: &Knowledge) -> Vec<VariantId> {
    let mut variants: Vec<VariantId> = knowledge
        .paths()
        .iter()
        .filter_map(|p| knowledge.entity(p).map(|e| e.variant.clone()))
        .collect();
    variants.sort();
    variants.dedup();
    variants
}

/// Moves every decidable `Possible` event; returns how many moved.
pub(crate) fn evaluate_events(
    kb: &dyn KnowledgeBase,
    knowledge: &Knowledge,
    handler: &mut RulesAndEventsHandler,
) -> ResolutionResult<usize> {
    let mut moved = 0;
    for variant in materialized_variants(knowledge) {
        let mut events: Vec<Event> = handler
            .events_by_variant(&variant)
            .into_iter()
            .filter(|e| handler.event_standing(&e.id) == Some(Standing::Possible))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));

        for event in events {
            match event_outcome(kb, knowledge, &event)? {
                EventOutcome::Holds => {
                    if handler.set_event_triggered(&event.id).is_some() {
                        debug!(event = %event.id, "event triggered");
                        moved += 1;
                    }
                }
                EventOutcome::Impossible => {
                    if handler.set_event_obsolete(&event.id).is_some() {
                        debug!(event = %event.id, "event obsolete");
                        moved += 1;
                    }
                }
                EventOutcome::Open => handler.touch_event(&event.id),
            }
        }
    }
    Ok(moved)
}

/// Fifth stage: moves events decided by the current tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventResolver;

impl Resolver for EventResolver {
    fn name(&self) -> &'static str {
        "event"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        _decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let mut knowledge = knowledge;
        evaluate_events(ctx.kb, &knowledge, ctx.handler)?;
        settle(ctx.kb, &mut knowledge, ctx.handler, &mut ctx.warnings)?;
        Ok(knowledge)
    }
}
