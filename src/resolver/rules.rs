//! Rule chaining and enforcement of rule conclusions.
//!
//! A rule fires when its premise event is triggered, which triggers its
//! conclusion event in turn. A triggered conclusion is a requirement on the
//! tree: for a positive event the alternatives to its selection are removed,
//! for a negated event the selection itself is removed. Enforcement is
//! idempotent and re-applied after every decision so it also reaches
//! entities materialized later.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::choices::{
    cleanup_concept_choices, cleanup_feature_choices, cleanup_variant_choices, prune_settled_concepts,
    restrict_feature_choice,
};
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{ConceptId, EventId, FeatureValueId, PurposeId, RuleId, VariantId};
use crate::knowledge::{Decision, Knowledge, KnowledgeEntity, Walk};
use crate::knowledge_base::{Event, KnowledgeBase, Rule, TriggerType};
use crate::rules_events::{RulesAndEventsHandler, Standing, Transition};

use super::{push_warning, settle, ResolutionContext, Resolver};

/// Keeps only `variant` in the entity's choice for `purpose`.
///
/// Returns false if `variant` can no longer be chosen there.
fn require_variant(entity: &mut KnowledgeEntity, purpose: &PurposeId, variant: &VariantId) -> bool {
    if entity.child(purpose, variant).is_some() {
        return true;
    }
    let Some(choice) = entity.variant_choices.iter_mut().find(|c| &c.purpose == purpose) else {
        return false;
    };
    if !choice.variants.contains(variant) {
        return false;
    }
    choice.variants.retain(|v| v == variant);
    true
}

fn require_value(entity: &mut KnowledgeEntity, value: &FeatureValueId) -> bool {
    if entity.values.iter().any(|v| &v.id == value) {
        return true;
    }
    let Some(feature) = entity
        .feature_choices
        .iter()
        .find(|c| c.offers(value))
        .map(|c| c.feature.clone())
    else {
        return false;
    };
    restrict_feature_choice(entity, &feature, std::slice::from_ref(value));
    true
}

/// Enforces `event` at the owner instance `instance`.
///
/// Returns false if the tree contradicts the event there.
fn enforce_at(
    kb: &dyn KnowledgeBase,
    knowledge: &mut Knowledge,
    instance: &[usize],
    event: &Event,
) -> ResolutionResult<bool> {
    let steps = event.context_path.steps();

    if event.trigger_type == TriggerType::Variant {
        let Some(((purpose, variant), prefix)) = steps.split_last() else {
            // the event observes its own owner, which exists
            return Ok(!event.not_event);
        };
        let Walk::Found(at) = knowledge.walk(instance, prefix) else {
            return Ok(true);
        };
        let entity = knowledge.require_entity_mut(&at)?;
        if event.not_event {
            if entity.child(purpose, variant).is_some() {
                return Ok(false);
            }
            let report = cleanup_variant_choices(&mut entity.variant_choices, Some(purpose), Some(variant));
            return Ok(report.emptied == 0);
        }
        return Ok(require_variant(entity, purpose, variant));
    }

    let Walk::Found(at) = knowledge.walk(instance, &steps) else {
        return Ok(true);
    };
    let entity = knowledge.require_entity_mut(&at)?;

    let consistent = match event.trigger_type {
        TriggerType::FeatureValue => {
            let value = FeatureValueId::new(event.trigger_id.as_str());
            if event.not_event {
                cleanup_feature_choices(entity, None, None, Some(&value));
                !entity.values.iter().any(|v| v.id == value)
            } else {
                require_value(entity, &value)
            }
        }
        TriggerType::Concept => {
            let id = ConceptId::new(event.trigger_id.as_str());
            let concept = kb
                .concept(&id)
                .ok_or_else(|| ResolutionError::inconsistent(format!("event '{}' observes unknown concept '{id}'", event.id)))?;
            if event.not_event {
                cleanup_concept_choices(entity, None, Some(std::slice::from_ref(&id)));
                let applied = concept
                    .values
                    .iter()
                    .all(|v| entity.values.iter().any(|applied| &applied.id == v));
                !applied
            } else {
                concept.values.iter().fold(true, |ok, v| require_value(entity, v) && ok)
            }
        }
        TriggerType::Variant => true,
    };
    prune_settled_concepts(kb, entity)?;
    Ok(consistent)
}

/// Conclusions of rules that have fired, sorted.
fn fired_conclusions(handler: &RulesAndEventsHandler) -> Vec<EventId> {
    let mut conclusions: Vec<EventId> = handler
        .rule_ids(Standing::Triggered)
        .into_iter()
        .filter_map(|id| handler.rule(id))
        .map(|r| r.conclusion.clone())
        .collect();
    conclusions.sort();
    conclusions.dedup();
    conclusions
}

/// Enforces every triggered conclusion of a fired rule on the tree.
///
/// Contradictions are reported only for rules fired during the current run.
pub(crate) fn enforce_conclusions(
    kb: &dyn KnowledgeBase,
    knowledge: &mut Knowledge,
    handler: &RulesAndEventsHandler,
    warnings: &mut Vec<String>,
) -> ResolutionResult<()> {
    let fresh: HashSet<&EventId> = handler
        .journal()
        .iter()
        .filter_map(|t| match t {
            Transition::Rule {
                id,
                to: Standing::Triggered,
            } => handler.rule(id).map(|r| &r.conclusion),
            _ => None,
        })
        .collect();

    for id in fired_conclusions(handler) {
        if handler.event_standing(&id) != Some(Standing::Triggered) {
            continue;
        }
        let Some(event) = handler.event(&id) else {
            continue;
        };
        let mut consistent = true;
        for instance in knowledge.find_root(&event.variant) {
            consistent &= enforce_at(kb, knowledge, &instance, event)?;
        }
        if !consistent && fresh.contains(&id) {
            push_warning(
                warnings,
                format!("conclusion '{id}' contradicts the current configuration"),
            );
        }
    }
    Ok(())
}

/// Sixth stage: fires rules whose premise was triggered during this run.
///
/// Chaining goes breadth first. Each rule fires at most once per session,
/// so a run fires at most as many rules as the handler holds.
#[derive(Debug, Default, Clone, Copy)]
pub struct RulesResolver;

impl RulesResolver {
    fn fire(ctx: &mut ResolutionContext<'_>, premise: &EventId, queue: &mut VecDeque<EventId>) {
        let mut rules: Vec<Rule> = ctx
            .handler
            .rules_by_trigger_event(premise)
            .into_iter()
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        for rule in rules {
            if ctx.handler.set_rule_triggered(&rule.id).is_none() {
                continue;
            }
            debug!(rule = %rule.id, premise = %premise, conclusion = %rule.conclusion, "rule fired");
            match ctx.handler.event_standing(&rule.conclusion) {
                Some(Standing::Possible) => {
                    ctx.handler.set_event_triggered(&rule.conclusion);
                    queue.push_back(rule.conclusion.clone());
                }
                Some(Standing::Triggered) => {}
                Some(Standing::Obsolete) => ctx.warn(format!(
                    "rule '{}' concludes event '{}' which can no longer hold",
                    rule.id, rule.conclusion
                )),
                None => ctx.warn(format!(
                    "rule '{}' concludes event '{}' which is not tracked",
                    rule.id, rule.conclusion
                )),
            }
        }
    }

    fn retire(ctx: &mut ResolutionContext<'_>, premise: &EventId) {
        let rules: Vec<RuleId> = ctx
            .handler
            .rules_by_trigger_event(premise)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();
        for id in rules {
            ctx.handler.set_rule_obsolete(&id);
        }
    }
}

impl Resolver for RulesResolver {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn resolve(
        &self,
        knowledge: Knowledge,
        _decision: Option<&Decision>,
        ctx: &mut ResolutionContext<'_>,
    ) -> ResolutionResult<Knowledge> {
        let mut knowledge = knowledge;
        let mut cursor = 0;
        let bound = ctx.handler.event_count() + ctx.handler.rule_count() + 1;

        for _ in 0..bound {
            let fresh: Vec<Transition> = ctx.handler.journal()[cursor..].to_vec();
            cursor = ctx.handler.journal().len();
            if fresh.is_empty() {
                break;
            }

            let mut queue = VecDeque::new();
            for transition in &fresh {
                match transition {
                    Transition::Event {
                        id,
                        to: Standing::Triggered,
                    } => queue.push_back(id.clone()),
                    Transition::Event {
                        id,
                        to: Standing::Obsolete,
                    } => Self::retire(ctx, id),
                    _ => {}
                }
            }
            while let Some(premise) = queue.pop_front() {
                Self::fire(ctx, &premise, &mut queue);
            }

            settle(ctx.kb, &mut knowledge, ctx.handler, &mut ctx.warnings)?;
        }
        Ok(knowledge)
    }
}
