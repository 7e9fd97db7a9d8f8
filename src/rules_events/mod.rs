//! Session-scoped state of events and rules.
//!
//! The handler is created once per session from the full catalog. Every
//! event and rule starts out `Possible` and moves at most once, to either
//! `Triggered` or `Obsolete`. Secondary indices are kept in step with the
//! stacks on insert and eviction so lookups never scan the catalog.

mod stack;

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::ids::{EventId, RuleId, VariantId};
use crate::knowledge_base::{ContextPath, Event, KnowledgeBase, Rule, TriggerType};

pub use stack::{Admission, BoundedStack, Standing};

/// A state change recorded in the handler's journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Event { id: EventId, to: Standing },
    Rule { id: RuleId, to: Standing },
}

type Index<K, V> = HashMap<K, HashSet<V>>;

fn index_insert<K: std::hash::Hash + Eq, V: std::hash::Hash + Eq>(index: &mut Index<K, V>, key: K, value: V) {
    index.entry(key).or_default().insert(value);
}

fn index_remove<K: std::hash::Hash + Eq, V: std::hash::Hash + Eq>(index: &mut Index<K, V>, key: &K, value: &V) {
    if let Some(set) = index.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

/// Three-state stacks for events and rules plus their lookup indices.
#[derive(Debug, Clone)]
pub struct RulesAndEventsHandler {
    events: BoundedStack<EventId, Event>,
    rules: BoundedStack<RuleId, Rule>,

    events_by_variant: Index<VariantId, EventId>,
    events_by_path: Index<ContextPath, EventId>,
    events_by_trigger: Index<(TriggerType, String), EventId>,
    rules_by_premise: Index<EventId, RuleId>,
    rules_by_conclusion: Index<EventId, RuleId>,
    rules_by_variant: Index<VariantId, RuleId>,

    journal: Vec<Transition>,
    warnings: Vec<String>,
}

impl RulesAndEventsHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new(max_events: usize, max_rules: usize) -> Self {
        Self {
            events: BoundedStack::new(max_events),
            rules: BoundedStack::new(max_rules),
            events_by_variant: HashMap::new(),
            events_by_path: HashMap::new(),
            events_by_trigger: HashMap::new(),
            rules_by_premise: HashMap::new(),
            rules_by_conclusion: HashMap::new(),
            rules_by_variant: HashMap::new(),
            journal: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Creates a handler holding every event and rule of `kb` as `Possible`.
    #[must_use]
    pub fn from_knowledge_base(kb: &dyn KnowledgeBase, max_events: usize, max_rules: usize) -> Self {
        let mut handler = Self::new(max_events, max_rules);
        for event in kb.events() {
            handler.insert_event(event.clone());
        }
        for rule in kb.rules() {
            handler.insert_rule(rule.clone());
        }
        handler
    }

    fn index_event(&mut self, event: &Event) {
        index_insert(&mut self.events_by_variant, event.variant.clone(), event.id.clone());
        index_insert(&mut self.events_by_path, event.context_path.clone(), event.id.clone());
        index_insert(
            &mut self.events_by_trigger,
            (event.trigger_type, event.trigger_id.clone()),
            event.id.clone(),
        );
    }

    fn unindex_event(&mut self, event: &Event) {
        index_remove(&mut self.events_by_variant, &event.variant, &event.id);
        index_remove(&mut self.events_by_path, &event.context_path, &event.id);
        index_remove(
            &mut self.events_by_trigger,
            &(event.trigger_type, event.trigger_id.clone()),
            &event.id,
        );
    }

    fn index_rule(&mut self, rule: &Rule) {
        index_insert(&mut self.rules_by_premise, rule.premise.clone(), rule.id.clone());
        index_insert(&mut self.rules_by_conclusion, rule.conclusion.clone(), rule.id.clone());
        index_insert(&mut self.rules_by_variant, rule.variant.clone(), rule.id.clone());
    }

    fn unindex_rule(&mut self, rule: &Rule) {
        index_remove(&mut self.rules_by_premise, &rule.premise, &rule.id);
        index_remove(&mut self.rules_by_conclusion, &rule.conclusion, &rule.id);
        index_remove(&mut self.rules_by_variant, &rule.variant, &rule.id);
    }

    fn record_warning(&mut self, message: String) {
        warn!(message = %message, "rules and events handler");
        self.warnings.push(message);
    }

    /// Adds an event as `Possible`.
    pub fn insert_event(&mut self, event: Event) -> Admission<EventId> {
        let evicted_value = self.lru_victim_event();
        let admission = self.events.insert(event.id.clone(), event.clone());
        match &admission {
            Admission::Inserted => self.index_event(&event),
            Admission::Evicted(id) => {
                if let Some(old) = evicted_value.filter(|old| &old.id == id) {
                    self.unindex_event(&old);
                }
                self.index_event(&event);
                self.record_warning(format!(
                    "event stack full (capacity {}): evicted possible event '{id}'",
                    self.events.capacity()
                ));
            }
            Admission::Rejected => self.record_warning(format!(
                "event stack full of durable events (capacity {}): dropped event '{}'",
                self.events.capacity(),
                event.id
            )),
            Admission::Duplicate => {}
        }
        admission
    }

    /// Adds a rule as `Possible`.
    pub fn insert_rule(&mut self, rule: Rule) -> Admission<RuleId> {
        let evicted_value = self.lru_victim_rule();
        let admission = self.rules.insert(rule.id.clone(), rule.clone());
        match &admission {
            Admission::Inserted => self.index_rule(&rule),
            Admission::Evicted(id) => {
                if let Some(old) = evicted_value.filter(|old| &old.id == id) {
                    self.unindex_rule(&old);
                }
                self.index_rule(&rule);
                self.record_warning(format!(
                    "rule stack full (capacity {}): evicted possible rule '{id}'",
                    self.rules.capacity()
                ));
            }
            Admission::Rejected => self.record_warning(format!(
                "rule stack full of durable rules (capacity {}): dropped rule '{}'",
                self.rules.capacity(),
                rule.id
            )),
            Admission::Duplicate => {}
        }
        admission
    }

    fn lru_victim_event(&self) -> Option<Event> {
        if self.events.len() < self.events.capacity() {
            return None;
        }
        self.events.peek_victim().and_then(|id| self.events.get(id)).cloned()
    }

    fn lru_victim_rule(&self) -> Option<Rule> {
        if self.rules.len() < self.rules.capacity() {
            return None;
        }
        self.rules.peek_victim().and_then(|id| self.rules.get(id)).cloned()
    }

    /// Moves a `Possible` event to `Triggered`.
    ///
    /// Returns the event if it moved; `None` if it was unknown or already terminal.
    pub fn set_event_triggered(&mut self, id: &EventId) -> Option<Event> {
        self.move_event(id, Standing::Triggered)
    }

    /// Moves a `Possible` event to `Obsolete`.
    pub fn set_event_obsolete(&mut self, id: &EventId) -> Option<Event> {
        self.move_event(id, Standing::Obsolete)
    }

    fn move_event(&mut self, id: &EventId, to: Standing) -> Option<Event> {
        let event = self.events.transition(id, to)?.clone();
        self.journal.push(Transition::Event { id: id.clone(), to });
        Some(event)
    }

    /// Moves a `Possible` rule to `Triggered`.
    pub fn set_rule_triggered(&mut self, id: &RuleId) -> Option<Rule> {
        self.move_rule(id, Standing::Triggered)
    }

    /// Moves a `Possible` rule to `Obsolete`.
    pub fn set_rule_obsolete(&mut self, id: &RuleId) -> Option<Rule> {
        self.move_rule(id, Standing::Obsolete)
    }

    fn move_rule(&mut self, id: &RuleId, to: Standing) -> Option<Rule> {
        let rule = self.rules.transition(id, to)?.clone();
        self.journal.push(Transition::Rule { id: id.clone(), to });
        Some(rule)
    }

    /// Marks an event as recently evaluated.
    pub fn touch_event(&mut self, id: &EventId) {
        self.events.touch(id);
    }

    /// Tracked event, whatever its standing.
    #[must_use]
    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    /// Tracked rule, whatever its standing.
    #[must_use]
    pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    /// Standing of a tracked event.
    #[must_use]
    pub fn event_standing(&self, id: &EventId) -> Option<Standing> {
        self.events.standing(id)
    }

    /// Standing of a tracked rule.
    #[must_use]
    pub fn rule_standing(&self, id: &RuleId) -> Option<Standing> {
        self.rules.standing(id)
    }

    #[must_use]
    pub fn is_possible(&self, id: &EventId) -> bool {
        self.events.standing(id) == Some(Standing::Possible)
    }

    #[must_use]
    pub fn is_triggered(&self, id: &EventId) -> bool {
        self.events.standing(id) == Some(Standing::Triggered)
    }

    #[must_use]
    pub fn is_obsolete(&self, id: &EventId) -> bool {
        self.events.standing(id) == Some(Standing::Obsolete)
    }

    fn lookup<'a, K, V>(index: &'a Index<K, V>, key: &K) -> Vec<&'a V>
    where
        K: std::hash::Hash + Eq,
    {
        index.get(key).map(|set| set.iter().collect()).unwrap_or_default()
    }

    /// Events owned by `variant`.
    #[must_use]
    pub fn events_by_variant(&self, variant: &VariantId) -> Vec<&Event> {
        Self::lookup(&self.events_by_variant, variant)
            .into_iter()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    /// Events located at `path`.
    #[must_use]
    pub fn events_by_context_path(&self, path: &ContextPath) -> Vec<&Event> {
        Self::lookup(&self.events_by_path, path)
            .into_iter()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    /// Events observing the selection of `trigger_id`.
    #[must_use]
    pub fn events_by_trigger(&self, trigger_type: TriggerType, trigger_id: &str) -> Vec<&Event> {
        Self::lookup(&self.events_by_trigger, &(trigger_type, trigger_id.to_string()))
            .into_iter()
            .filter_map(|id| self.events.get(id))
            .collect()
    }

    /// Rules with `event` as premise.
    #[must_use]
    pub fn rules_by_premise_event(&self, event: &EventId) -> Vec<&Rule> {
        Self::lookup(&self.rules_by_premise, event)
            .into_iter()
            .filter_map(|id| self.rules.get(id))
            .collect()
    }

    /// Still `Possible` rules that `event` would fire.
    #[must_use]
    pub fn rules_by_trigger_event(&self, event: &EventId) -> Vec<&Rule> {
        self.rules_by_premise_event(event)
            .into_iter()
            .filter(|r| self.rules.standing(&r.id) == Some(Standing::Possible))
            .collect()
    }

    /// Rules with `event` as conclusion.
    #[must_use]
    pub fn rules_by_conclusion_event(&self, event: &EventId) -> Vec<&Rule> {
        Self::lookup(&self.rules_by_conclusion, event)
            .into_iter()
            .filter_map(|id| self.rules.get(id))
            .collect()
    }

    /// Rules owned by `variant`.
    #[must_use]
    pub fn rules_by_variant(&self, variant: &VariantId) -> Vec<&Rule> {
        Self::lookup(&self.rules_by_variant, variant)
            .into_iter()
            .filter_map(|id| self.rules.get(id))
            .collect()
    }

    /// Ids of events currently in `standing`.
    #[must_use]
    pub fn event_ids(&self, standing: Standing) -> Vec<&EventId> {
        self.events.keys_in(standing).collect()
    }

    /// Ids of rules currently in `standing`.
    #[must_use]
    pub fn rule_ids(&self, standing: Standing) -> Vec<&RuleId> {
        self.rules.keys_in(standing).collect()
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Transitions recorded since the journal was last cleared.
    #[must_use]
    pub fn journal(&self) -> &[Transition] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Events moved to `standing` since the journal was last cleared.
    #[must_use]
    pub fn journaled_events(&self, standing: Standing) -> Vec<EventId> {
        self.journal
            .iter()
            .filter_map(|t| match t {
                Transition::Event { id, to } if *to == standing => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Takes the warnings recorded since the last call.
    pub fn drain_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
