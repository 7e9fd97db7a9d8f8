//! In-memory knowledge base.
//!
//! Built once from a [`Catalog`] and read-only afterwards, so it needs no
//! locking. Secondary indices (by variant, by purpose) are computed up front.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_RANGE_VALUES;
use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{ConceptId, EventId, FeatureId, FeatureValueId, PurposeId, RelationId, RuleId, VariantId};
use crate::value::{calculate_range, FeatureValue};

use super::model::{
    Concept, Constitutes, Event, Feature, FeatureDomain, Fulfills, Purpose, Relation, RelationParameter, Rule,
    Variant,
};
use super::traits::KnowledgeBase;

/// Serializable catalog document.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub purposes: Vec<Purpose>,
    pub variants: Vec<Variant>,
    pub features: Vec<Feature>,
    pub feature_values: Vec<FeatureValue>,
    pub concepts: Vec<Concept>,
    pub fulfills: Vec<Fulfills>,
    pub constitutes: Vec<Constitutes>,
    pub events: Vec<Event>,
    pub rules: Vec<Rule>,
    pub relations: Vec<Relation>,
}

fn dangling(kind: &str, id: impl std::fmt::Display, context: impl std::fmt::Display) -> ResolutionError {
    ResolutionError::inconsistent(format!("{context} references unknown {kind} '{id}'"))
}

fn insert_unique<K, V>(map: &mut HashMap<K, V>, key: K, value: V, kind: &str) -> ResolutionResult<()>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
{
    if map.contains_key(&key) {
        return Err(ResolutionError::inconsistent(format!("duplicate {kind} id '{key}'")));
    }
    map.insert(key, value);
    Ok(())
}

/// Knowledge base held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeBase {
    purposes: HashMap<PurposeId, Purpose>,
    variants: HashMap<VariantId, Variant>,
    features: HashMap<FeatureId, Feature>,
    feature_values: HashMap<FeatureValueId, FeatureValue>,
    concepts: HashMap<ConceptId, Concept>,
    relations: HashMap<RelationId, Relation>,
    events: Vec<Event>,
    event_index: HashMap<EventId, usize>,
    rules: Vec<Rule>,
    rule_index: HashMap<RuleId, usize>,

    fulfills: HashMap<PurposeId, Vec<VariantId>>,
    quantities: HashMap<PurposeId, u32>,
    constitutes: HashMap<VariantId, Vec<PurposeId>>,
    events_by_variant: HashMap<VariantId, Vec<EventId>>,
    rules_by_variant: HashMap<VariantId, Vec<RuleId>>,
    relations_by_variant: HashMap<VariantId, Vec<RelationId>>,
    concepts_by_variant: HashMap<VariantId, Vec<ConceptId>>,
    root_purposes: Vec<PurposeId>,

    max_range_values: usize,
}

impl InMemoryKnowledgeBase {
    /// Parses a JSON catalog and indexes it.
    pub fn from_json(json: &str) -> ResolutionResult<Self> {
        let catalog: Catalog = serde_json::from_str(json)
            .map_err(|e| ResolutionError::inconsistent(format!("catalog is not valid JSON: {e}")))?;
        Self::from_catalog(catalog)
    }

    /// Indexes a catalog, rejecting duplicate ids and dangling references.
    pub fn from_catalog(catalog: Catalog) -> ResolutionResult<Self> {
        let mut kb = Self {
            max_range_values: DEFAULT_MAX_RANGE_VALUES,
            ..Self::default()
        };

        for p in catalog.purposes {
            if p.is_root {
                kb.root_purposes.push(p.id.clone());
            }
            insert_unique(&mut kb.purposes, p.id.clone(), p, "purpose")?;
        }
        for v in catalog.variants {
            insert_unique(&mut kb.variants, v.id.clone(), v, "variant")?;
        }
        for fv in catalog.feature_values {
            insert_unique(&mut kb.feature_values, fv.id.clone(), fv, "feature value")?;
        }
        for f in catalog.features {
            insert_unique(&mut kb.features, f.id.clone(), f, "feature")?;
        }

        for variant in kb.variants.values() {
            for f in &variant.features {
                if !kb.features.contains_key(f) {
                    return Err(dangling("feature", f, format!("variant '{}'", variant.id)));
                }
            }
        }
        for feature in kb.features.values() {
            if let FeatureDomain::Values { values } = &feature.domain {
                for id in values {
                    let fv = kb
                        .feature_values
                        .get(id)
                        .ok_or_else(|| dangling("feature value", id, format!("feature '{}'", feature.id)))?;
                    if fv.feature != feature.id || fv.value_type != feature.value_type {
                        return Err(ResolutionError::inconsistent(format!(
                            "feature value '{id}' does not belong to feature '{}'",
                            feature.id
                        )));
                    }
                }
            }
        }

        for edge in catalog.fulfills {
            if !kb.purposes.contains_key(&edge.purpose) {
                return Err(dangling("purpose", &edge.purpose, "fulfills edge"));
            }
            for v in &edge.variants {
                if !kb.variants.contains_key(v) {
                    return Err(dangling("variant", v, format!("fulfills of '{}'", edge.purpose)));
                }
            }
            kb.quantities.insert(edge.purpose.clone(), edge.quantity.max(1));
            let entry = kb.fulfills.entry(edge.purpose).or_default();
            for v in edge.variants {
                if !entry.contains(&v) {
                    entry.push(v);
                }
            }
        }
        for edge in catalog.constitutes {
            if !kb.variants.contains_key(&edge.variant) {
                return Err(dangling("variant", &edge.variant, "constitutes edge"));
            }
            for p in &edge.purposes {
                if !kb.purposes.contains_key(p) {
                    return Err(dangling("purpose", p, format!("constitutes of '{}'", edge.variant)));
                }
            }
            let entry = kb.constitutes.entry(edge.variant).or_default();
            for p in edge.purposes {
                if !entry.contains(&p) {
                    entry.push(p);
                }
            }
        }

        for c in catalog.concepts {
            if !kb.variants.contains_key(&c.variant) {
                return Err(dangling("variant", &c.variant, format!("concept '{}'", c.id)));
            }
            for v in &c.values {
                if !kb.feature_values.contains_key(v) {
                    return Err(dangling("feature value", v, format!("concept '{}'", c.id)));
                }
            }
            kb.concepts_by_variant.entry(c.variant.clone()).or_default().push(c.id.clone());
            insert_unique(&mut kb.concepts, c.id.clone(), c, "concept")?;
        }

        for e in catalog.events {
            if !kb.variants.contains_key(&e.variant) {
                return Err(dangling("variant", &e.variant, format!("event '{}'", e.id)));
            }
            if kb.event_index.contains_key(&e.id) {
                return Err(ResolutionError::inconsistent(format!("duplicate event id '{}'", e.id)));
            }
            kb.events_by_variant.entry(e.variant.clone()).or_default().push(e.id.clone());
            kb.event_index.insert(e.id.clone(), kb.events.len());
            kb.events.push(e);
        }

        for r in catalog.rules {
            if !kb.variants.contains_key(&r.variant) {
                return Err(dangling("variant", &r.variant, format!("rule '{}'", r.id)));
            }
            for ev in [&r.premise, &r.conclusion] {
                if !kb.event_index.contains_key(ev) {
                    return Err(dangling("event", ev, format!("rule '{}'", r.id)));
                }
            }
            if kb.rule_index.contains_key(&r.id) {
                return Err(ResolutionError::inconsistent(format!("duplicate rule id '{}'", r.id)));
            }
            kb.rules_by_variant.entry(r.variant.clone()).or_default().push(r.id.clone());
            kb.rule_index.insert(r.id.clone(), kb.rules.len());
            kb.rules.push(r);
        }

        for rel in catalog.relations {
            if !kb.variants.contains_key(&rel.variant) {
                return Err(dangling("variant", &rel.variant, format!("relation '{}'", rel.id)));
            }
            for param in [&rel.left, &rel.right] {
                match param {
                    RelationParameter::Constant { value } => {
                        if !kb.feature_values.contains_key(value) {
                            return Err(dangling("feature value", value, format!("relation '{}'", rel.id)));
                        }
                    }
                    RelationParameter::Variable { feature, .. } => {
                        if !kb.features.contains_key(feature) {
                            return Err(dangling("feature", feature, format!("relation '{}'", rel.id)));
                        }
                    }
                }
            }
            kb.relations_by_variant.entry(rel.variant.clone()).or_default().push(rel.id.clone());
            insert_unique(&mut kb.relations, rel.id.clone(), rel, "relation")?;
        }

        Ok(kb)
    }

    /// Overrides the maximum cardinality of generated ranges.
    #[must_use]
    pub fn with_range_limit(mut self, limit: usize) -> Self {
        self.max_range_values = limit.max(1);
        self
    }
}

impl KnowledgeBase for InMemoryKnowledgeBase {
    fn purpose(&self, id: &PurposeId) -> Option<&Purpose> {
        self.purposes.get(id)
    }

    fn variant(&self, id: &VariantId) -> Option<&Variant> {
        self.variants.get(id)
    }

    fn feature(&self, id: &FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    fn feature_value(&self, id: &FeatureValueId) -> Option<&FeatureValue> {
        self.feature_values.get(id)
    }

    fn concept(&self, id: &ConceptId) -> Option<&Concept> {
        self.concepts.get(id)
    }

    fn event(&self, id: &EventId) -> Option<&Event> {
        self.event_index.get(id).map(|&i| &self.events[i])
    }

    fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.rule_index.get(id).map(|&i| &self.rules[i])
    }

    fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.relations.get(id)
    }

    fn fulfills(&self, purpose: &PurposeId) -> &[VariantId] {
        self.fulfills.get(purpose).map(Vec::as_slice).unwrap_or_default()
    }

    fn constitutes(&self, variant: &VariantId) -> &[PurposeId] {
        self.constitutes.get(variant).map(Vec::as_slice).unwrap_or_default()
    }

    fn quantity(&self, purpose: &PurposeId, variant: &VariantId) -> u32 {
        if self.is_fulfilled_by(purpose, variant) {
            self.quantities.get(purpose).copied().unwrap_or(1)
        } else {
            0
        }
    }

    fn features(&self, variant: &VariantId) -> &[FeatureId] {
        self.variants.get(variant).map(|v| v.features.as_slice()).unwrap_or_default()
    }

    fn feature_values(&self, variant: &VariantId, feature: &FeatureId) -> ResolutionResult<Vec<FeatureValue>> {
        if !self.features(variant).contains(feature) {
            return Err(ResolutionError::inconsistent(format!(
                "variant '{variant}' does not carry feature '{feature}'"
            )));
        }
        let f = self
            .features
            .get(feature)
            .ok_or_else(|| dangling("feature", feature, format!("variant '{variant}'")))?;

        match &f.domain {
            FeatureDomain::Values { values } => values
                .iter()
                .map(|id| {
                    self.feature_values
                        .get(id)
                        .cloned()
                        .ok_or_else(|| dangling("feature value", id, format!("feature '{feature}'")))
                })
                .collect(),
            FeatureDomain::Range { min, max, step } => {
                calculate_range(feature, f.value_type, min, max, step.as_deref(), self.max_range_values)
            }
        }
    }

    fn attached_events(&self, variant: &VariantId) -> &[EventId] {
        self.events_by_variant.get(variant).map(Vec::as_slice).unwrap_or_default()
    }

    fn attached_rules(&self, variant: &VariantId) -> &[RuleId] {
        self.rules_by_variant.get(variant).map(Vec::as_slice).unwrap_or_default()
    }

    fn attached_relations(&self, variant: &VariantId) -> &[RelationId] {
        self.relations_by_variant.get(variant).map(Vec::as_slice).unwrap_or_default()
    }

    fn attached_concepts(&self, variant: &VariantId) -> &[ConceptId] {
        self.concepts_by_variant.get(variant).map(Vec::as_slice).unwrap_or_default()
    }

    fn root_purposes(&self) -> &[PurposeId] {
        &self.root_purposes
    }

    fn events(&self) -> Vec<&Event> {
        self.events.iter().collect()
    }

    fn rules(&self) -> Vec<&Rule> {
        self.rules.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn catalog() -> serde_json::Value {
        json!({
            "purposes": [
                {"id": "vehicle", "is_root": true},
                {"id": "engine"}
            ],
            "variants": [
                {"id": "car", "features": ["colour"]},
                {"id": "v6"},
                {"id": "v8", "features": ["displacement"]}
            ],
            "features": [
                {"id": "colour", "value_type": "string", "domain": {"kind": "values", "values": ["red", "blue"]}},
                {"id": "displacement", "value_type": "float", "domain": {"kind": "range", "min": "4.0", "max": "5.0", "step": "0.5"}}
            ],
            "feature_values": [
                {"id": "red", "feature": "colour", "value_type": "string", "value": "red"},
                {"id": "blue", "feature": "colour", "value_type": "string", "value": "blue"}
            ],
            "fulfills": [
                {"purpose": "vehicle", "variants": ["car"]},
                {"purpose": "engine", "variants": ["v6", "v8"], "quantity": 2}
            ],
            "constitutes": [
                {"variant": "car", "purposes": ["engine"]}
            ]
        })
    }

    #[test]
    fn builds_indices_from_json() {
        let kb = InMemoryKnowledgeBase::from_json(&catalog().to_string()).unwrap();
        assert_eq!(kb.root_purposes(), &[PurposeId::new("vehicle")]);
        assert_eq!(kb.fulfills(&"engine".into()).len(), 2);
        assert!(kb.is_constituted_by(&"car".into(), &"engine".into()));
        assert!(kb.is_fulfilled_by(&"engine".into(), &"v8".into()));
        assert_eq!(kb.quantity(&"engine".into(), &"v8".into()), 2);
        assert_eq!(kb.quantity(&"engine".into(), &"car".into()), 0);
        assert!(kb.fulfills(&"missing".into()).is_empty());
    }

    #[test]
    fn feature_values_expand_ranges() {
        let kb = InMemoryKnowledgeBase::from_json(&catalog().to_string()).unwrap();
        let values = kb.feature_values(&"v8".into(), &"displacement".into()).unwrap();
        let literals: Vec<_> = values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(literals, ["4", "4.5", "5"]);

        let colours = kb.feature_values(&"car".into(), &"colour".into()).unwrap();
        assert_eq!(colours.len(), 2);

        let err = kb.feature_values(&"v6".into(), &"colour".into()).unwrap_err();
        assert!(matches!(err, ResolutionError::InconsistentKnowledgeBase { .. }));
    }

    #[test]
    fn range_limit_is_enforced_lazily() {
        let kb = InMemoryKnowledgeBase::from_json(&catalog().to_string())
            .unwrap()
            .with_range_limit(2);
        let err = kb.feature_values(&"v8".into(), &"displacement".into()).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidRange { .. }));
    }

    #[test]
    fn rejects_dangling_references() {
        let mut doc = catalog();
        doc["fulfills"][1]["variants"] = json!(["v6", "v12"]);
        let err = InMemoryKnowledgeBase::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, ResolutionError::InconsistentKnowledgeBase { .. }));
        assert!(err.to_string().contains("v12"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut doc = catalog();
        doc["variants"] = json!([{"id": "car"}, {"id": "car"}]);
        assert!(InMemoryKnowledgeBase::from_json(&doc.to_string()).is_err());
    }

    #[test]
    fn rejects_value_of_foreign_feature() {
        let mut doc = catalog();
        doc["feature_values"][1]["feature"] = json!("displacement");
        assert!(InMemoryKnowledgeBase::from_json(&doc.to_string()).is_err());
    }
}
