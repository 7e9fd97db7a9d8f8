//! End-to-end resolution through the service facade.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use kyroconf::knowledge::Choice;
use kyroconf::knowledge_base::{ContextPath, Event, Operator, Relation, RelationParameter, TriggerType};
use kyroconf::{
    ConceptId, Decision, InMemoryKnowledgeBase, Knowledge, Metadata, ResolutionConfig, ResolutionError, ResolutionService,
    SessionId, Standing,
};

fn select(svc: &ResolutionService, id: &SessionId, decision: Decision) -> Knowledge {
    let response = svc.select(id, &decision, &Metadata::default());
    assert!(response.is_ok(), "{decision:?} failed: {:?}", response.errors);
    response.knowledge.expect("successful select carries knowledge")
}

fn applied_values(knowledge: &Knowledge) -> BTreeSet<String> {
    knowledge
        .paths()
        .iter()
        .filter_map(|p| knowledge.entity(p))
        .flat_map(|e| e.values.iter().map(move |v| format!("{}:{}", e.variant, v.id)))
        .collect()
}

fn offered(knowledge: &Knowledge, variant: &str, feature: &str) -> Vec<String> {
    let path = knowledge.find_root(&variant.into()).into_iter().next().expect("variant is materialized");
    knowledge
        .entity(&path)
        .and_then(|e| e.feature_choice(&feature.into()))
        .map(|c| c.values.iter().map(|v| v.id.to_string()).collect())
        .unwrap_or_default()
}

fn standing(svc: &ResolutionService, id: &SessionId, event: &str) -> Option<Standing> {
    svc.with_session(id, |s| s.handler.event_standing(&event.into())).unwrap()
}

#[test]
fn init_offers_the_root_choice() {
    common::init_tracing();
    let svc = common::service();
    let (_, knowledge) = svc.init(Metadata::default()).into_result().unwrap();

    assert_eq!(knowledge.entity_count(), 0);
    assert_eq!(knowledge.choices.len(), 1);
    let Choice::Variant(root) = &knowledge.choices[0] else {
        panic!("expected a variant choice, got {:?}", knowledge.choices[0]);
    };
    assert_eq!(root.purpose.as_str(), "system");
    assert_eq!(root.variants.len(), 2);
}

#[test]
fn single_candidate_purposes_are_completed() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let knowledge = select(&svc, &id, Decision::variant("system", "desktop"));

    let fans = knowledge.find_root(&"fan120".into());
    assert_eq!(fans.len(), 1);
    assert_eq!(knowledge.entity(&fans[0]).unwrap().quantity, 2);
    // cpu and psu still need a decision
    assert_eq!(knowledge.entity_count(), 2);
    assert!(knowledge.roots[0].variant_choice(&"cpu".into()).is_some());
    assert!(knowledge.roots[0].variant_choice(&"psu".into()).is_some());
}

#[test]
fn successful_decisions_only_narrow_the_configuration() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let decisions = [
        Decision::variant("system", "desktop"),
        Decision::feature("desktop", "finish", "gloss"),
        Decision::variant("psu", "atx"),
        Decision::feature("desktop", "max_draw", "draw300"),
        Decision::variant("cpu", "i5"),
        Decision::feature("atx", "wattage", "w450"),
    ];

    let mut previous = svc.current(&id).knowledge.unwrap();
    for decision in decisions {
        let next = select(&svc, &id, decision.clone());
        assert!(next.entity_count() >= previous.entity_count(), "{decision:?} dropped entities");
        assert!(
            applied_values(&next).is_superset(&applied_values(&previous)),
            "{decision:?} dropped applied values"
        );
        previous = next;
    }

    // decided purposes and features are no longer offered
    assert!(!previous.choices.iter().any(|c| match c {
        Choice::Variant(v) => ["system", "cpu", "psu"].contains(&v.purpose.as_str()),
        Choice::Feature(f) => ["finish", "max_draw", "wattage"].contains(&f.feature.as_str()),
        Choice::Concept(_) => false,
    }));
}

#[test]
fn stale_choice_is_rejected() {
    let svc = common::service();
    let id = common::open_session(&svc);
    select(&svc, &id, Decision::variant("system", "desktop"));
    select(&svc, &id, Decision::variant("cpu", "i5"));

    let response = svc.select(&id, &Decision::variant("cpu", "i9"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::UnknownChoice { .. })));
}

#[test]
fn current_is_idempotent() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let selected = select(&svc, &id, Decision::variant("system", "desktop"));

    let first = svc.current(&id).knowledge.unwrap().fingerprint().unwrap();
    let second = svc.current(&id).knowledge.unwrap().fingerprint().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, selected.fingerprint().unwrap());
}

#[test]
fn rules_chain_through_the_configuration() {
    let svc = common::service();
    let id = common::open_session(&svc);
    select(&svc, &id, Decision::variant("system", "desktop"));
    assert_eq!(standing(&svc, &id, "desktop-i9"), Some(Standing::Possible));

    let knowledge = select(&svc, &id, Decision::variant("cpu", "i9"));
    assert_eq!(standing(&svc, &id, "desktop-i9"), Some(Standing::Triggered));
    assert_eq!(standing(&svc, &id, "desktop-liquid"), Some(Standing::Triggered));
    assert_eq!(standing(&svc, &id, "desktop-no-sfx"), Some(Standing::Triggered));
    // the quiet concept needs air cooling, which is gone
    assert_eq!(standing(&svc, &id, "desktop-quiet"), Some(Standing::Obsolete));

    assert_eq!(offered(&knowledge, "desktop", "cool"), ["cool_liquid"]);
    let psu = knowledge.roots[0].variant_choice(&"psu".into()).unwrap();
    assert_eq!(psu.variants, vec!["atx".into()]);

    let response = svc.select(&id, &Decision::variant("psu", "sfx"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::UnknownChoice { .. })));
    let response = svc.select(&id, &Decision::feature("desktop", "cool", "cool_air"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::UnknownChoice { .. })));
}

#[test]
fn concept_decision_applies_every_value() {
    let svc = common::service();
    let id = common::open_session(&svc);
    select(&svc, &id, Decision::variant("system", "desktop"));
    let knowledge = select(&svc, &id, Decision::concept("desktop", "quiet"));

    let desktop = &knowledge.roots[0];
    for feature in ["max_draw", "cool", "finish"] {
        assert!(desktop.applied_value(&feature.into()).is_some(), "{feature} not applied");
    }
    assert_eq!(desktop.concepts, vec![ConceptId::from("quiet")]);
    assert_eq!(standing(&svc, &id, "desktop-quiet"), Some(Standing::Triggered));
}

#[test]
fn relation_filters_the_open_side() {
    let svc = common::service();
    let id = common::open_session(&svc);
    select(&svc, &id, Decision::variant("system", "desktop"));
    select(&svc, &id, Decision::variant("psu", "atx"));
    let knowledge = select(&svc, &id, Decision::feature("desktop", "max_draw", "draw600"));

    assert_eq!(offered(&knowledge, "atx", "wattage"), ["w750"]);
    assert_eq!(offered(&knowledge, "desktop", "cool"), ["cool_liquid"]);

    let response = svc.select(&id, &Decision::feature("atx", "wattage", "w450"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::UnknownChoice { .. })));
}

#[test]
fn relation_filtering_coerces_integer_and_float() {
    let svc = common::service();
    let id = common::open_session(&svc);
    select(&svc, &id, Decision::variant("system", "desktop"));
    select(&svc, &id, Decision::variant("psu", "atx"));
    // 300.0 <= 300 holds across Float and Integer
    let knowledge = select(&svc, &id, Decision::feature("desktop", "max_draw", "draw300"));
    assert_eq!(offered(&knowledge, "atx", "wattage"), ["w300", "w450", "w750"]);
}

#[test]
fn violated_relation_rejects_the_decision_and_keeps_the_session() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let before = select(&svc, &id, Decision::variant("system", "desktop"));

    // overclock fixes 600 draw on 400 cooling in one step
    let response = svc.select(&id, &Decision::concept("desktop", "overclock"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::InvalidDecision { .. })));
    assert_eq!(
        response.knowledge.unwrap().fingerprint().unwrap(),
        before.fingerprint().unwrap()
    );
    assert_eq!(standing(&svc, &id, "desktop-quiet"), Some(Standing::Possible));

    // the session keeps working after the rejection
    select(&svc, &id, Decision::variant("cpu", "i5"));
    assert!(svc.current(&id).is_ok());
}

#[test]
fn ranged_values_are_generated_and_selectable() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let knowledge = select(&svc, &id, Decision::variant("system", "desktop"));
    assert_eq!(
        offered(&knowledge, "desktop", "fan_rpm"),
        ["fan_rpm=800", "fan_rpm=1000", "fan_rpm=1200"]
    );

    let knowledge = select(&svc, &id, Decision::feature("desktop", "fan_rpm", "fan_rpm=1000"));
    let rpm = knowledge.roots[0].applied_value(&"fan_rpm".into()).unwrap();
    assert_eq!(rpm.value, "1000");
}

#[test]
fn unknown_sessions_are_reported() {
    let svc = common::service();
    let ghost = SessionId::new();
    for response in [
        svc.current(&ghost),
        svc.select(&ghost, &Decision::variant("system", "desktop"), &Metadata::default()),
    ] {
        assert!(matches!(response.error(), Some(ResolutionError::UnknownSession { .. })));
        assert!(response.knowledge.is_none());
    }
    assert!(matches!(
        SessionId::parse("not-a-session"),
        Err(ResolutionError::UnknownSession { .. })
    ));
}

#[test]
fn invalid_context_path_is_a_knowledge_base_defect() {
    let mut catalog = common::catalog();
    catalog.events.push(Event {
        id: "broken".into(),
        variant: "desktop".into(),
        context_path: ContextPath::new(["desktop", "psu", "i9"]),
        trigger_type: TriggerType::Variant,
        trigger_id: "i9".to_string(),
        not_event: false,
    });
    let kb = InMemoryKnowledgeBase::from_catalog(catalog).unwrap();
    let svc = ResolutionService::new(Arc::new(kb), ResolutionConfig::default());
    let id = common::open_session(&svc);

    let response = svc.select(&id, &Decision::variant("system", "desktop"), &Metadata::default());
    let err = response.error().unwrap();
    assert!(matches!(err, ResolutionError::InconsistentKnowledgeBase { .. }));
    assert!(err.is_knowledge_base_defect());
    assert_eq!(response.knowledge.unwrap().entity_count(), 0);
}

#[test]
fn string_and_number_never_compare() {
    let mut catalog = common::catalog();
    catalog.relations.push(Relation {
        id: "nonsense".into(),
        variant: "desktop".into(),
        operator: Operator::Eq,
        left: RelationParameter::Variable {
            feature: "finish".into(),
            context_path: ContextPath::new(["desktop"]),
        },
        right: RelationParameter::Variable {
            feature: "max_draw".into(),
            context_path: ContextPath::new(["desktop"]),
        },
    });
    let kb = InMemoryKnowledgeBase::from_catalog(catalog).unwrap();
    let svc = ResolutionService::new(Arc::new(kb), ResolutionConfig::default());
    let id = common::open_session(&svc);

    let response = svc.select(&id, &Decision::variant("system", "desktop"), &Metadata::default());
    assert!(matches!(response.error(), Some(ResolutionError::TypeMismatch { .. })));
}

#[test]
fn constitutes_cycle_fails_init_without_a_session() {
    let doc = serde_json::json!({
        "purposes": [{"id": "root", "is_root": true}, {"id": "again"}],
        "variants": [{"id": "loop"}],
        "fulfills": [{"purpose": "root", "variants": ["loop"]}, {"purpose": "again", "variants": ["loop"]}],
        "constitutes": [{"variant": "loop", "purposes": ["again"]}]
    });
    let kb = InMemoryKnowledgeBase::from_json(&doc.to_string()).unwrap();
    let svc = ResolutionService::new(Arc::new(kb), ResolutionConfig::default());

    let response = svc.init(Metadata::default());
    assert!(response.session_id.is_none());
    assert!(matches!(
        response.error(),
        Some(ResolutionError::InconsistentKnowledgeBase { .. })
    ));
    assert_eq!(svc.session_count().unwrap(), 0);
}

#[test]
fn metadata_is_merged_into_the_session() {
    let svc = common::service();
    let id = common::open_session(&svc);
    let metadata = Metadata::default().with_locale("de-DE").with_attribute("channel", "web");
    let response = svc.select(&id, &Decision::variant("system", "server"), &metadata);
    assert!(response.is_ok());

    let (client, locale) = svc
        .with_session(&id, |s| (s.metadata.client.clone(), s.metadata.locale.clone()))
        .unwrap();
    assert_eq!(client.as_deref(), Some("tests"));
    assert_eq!(locale.as_deref(), Some("de-DE"));
}
