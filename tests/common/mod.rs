//! Shared catalog for integration tests.
//!
//! A computer shop: the root `system` is a desktop or a server. A desktop
//! needs a cpu, a psu and two fans; fans have a single candidate and are
//! completed automatically. Choosing an i9 requires liquid cooling, which in
//! turn rules out the small form factor psu.

#![allow(dead_code)]

use std::sync::Arc;

use kyroconf::{Catalog, InMemoryKnowledgeBase, Metadata, ResolutionConfig, ResolutionService, SessionId};
use serde_json::{json, Value};

pub fn catalog_json() -> Value {
    json!({
        "purposes": [
            {"id": "system", "is_root": true, "label": "System"},
            {"id": "cpu"}, {"id": "psu"}, {"id": "fans"}
        ],
        "variants": [
            {"id": "desktop", "features": ["max_draw", "cool", "fan_rpm", "finish"]},
            {"id": "server"},
            {"id": "i5"}, {"id": "i9"},
            {"id": "atx", "features": ["wattage"]},
            {"id": "sfx", "features": ["wattage"]},
            {"id": "fan120"}
        ],
        "features": [
            {"id": "max_draw", "value_type": "float", "domain": {"kind": "values", "values": ["draw300", "draw600"]}},
            {"id": "cool", "value_type": "integer", "domain": {"kind": "values", "values": ["cool_air", "cool_liquid"]}},
            {"id": "fan_rpm", "value_type": "float", "domain": {"kind": "range", "min": "800", "max": "1200", "step": "200"}},
            {"id": "finish", "value_type": "string", "domain": {"kind": "values", "values": ["matte", "gloss"]}},
            {"id": "wattage", "value_type": "integer", "domain": {"kind": "values", "values": ["w300", "w450", "w750"]}}
        ],
        "feature_values": [
            {"id": "draw300", "feature": "max_draw", "value_type": "float", "value": "300.0"},
            {"id": "draw600", "feature": "max_draw", "value_type": "float", "value": "600"},
            {"id": "cool_air", "feature": "cool", "value_type": "integer", "value": "400"},
            {"id": "cool_liquid", "feature": "cool", "value_type": "integer", "value": "900"},
            {"id": "matte", "feature": "finish", "value_type": "string", "value": "matte"},
            {"id": "gloss", "feature": "finish", "value_type": "string", "value": "gloss"},
            {"id": "w300", "feature": "wattage", "value_type": "integer", "value": "300"},
            {"id": "w450", "feature": "wattage", "value_type": "integer", "value": "450"},
            {"id": "w750", "feature": "wattage", "value_type": "integer", "value": "750"}
        ],
        "concepts": [
            {"id": "overclock", "variant": "desktop", "values": ["draw600", "cool_air"]},
            {"id": "quiet", "variant": "desktop", "values": ["draw300", "cool_air", "matte"]}
        ],
        "fulfills": [
            {"purpose": "system", "variants": ["desktop", "server"]},
            {"purpose": "cpu", "variants": ["i5", "i9"]},
            {"purpose": "psu", "variants": ["atx", "sfx"]},
            {"purpose": "fans", "variants": ["fan120"], "quantity": 2}
        ],
        "constitutes": [
            {"variant": "desktop", "purposes": ["cpu", "psu", "fans"]},
            {"variant": "server", "purposes": ["cpu"]}
        ],
        "events": [
            {"id": "desktop-i9", "variant": "desktop", "context_path": ["desktop", "cpu", "i9"],
             "trigger_type": "variant", "trigger_id": "i9"},
            {"id": "desktop-liquid", "variant": "desktop", "context_path": ["desktop"],
             "trigger_type": "feature_value", "trigger_id": "cool_liquid"},
            {"id": "desktop-no-sfx", "variant": "desktop", "context_path": ["desktop", "psu", "sfx"],
             "trigger_type": "variant", "trigger_id": "sfx", "not_event": true},
            {"id": "desktop-quiet", "variant": "desktop", "context_path": ["desktop"],
             "trigger_type": "concept", "trigger_id": "quiet"}
        ],
        "rules": [
            {"id": "i9-needs-liquid", "variant": "desktop", "premise": "desktop-i9", "conclusion": "desktop-liquid"},
            {"id": "liquid-needs-atx", "variant": "desktop", "premise": "desktop-liquid", "conclusion": "desktop-no-sfx"}
        ],
        "relations": [
            {"id": "psu-covers-draw", "variant": "desktop", "operator": "LE",
             "left": {"kind": "variable", "feature": "max_draw", "context_path": ["desktop"]},
             "right": {"kind": "variable", "feature": "wattage", "context_path": ["desktop", "psu", "atx"]}},
            {"id": "cooling-covers-draw", "variant": "desktop", "operator": "GE",
             "left": {"kind": "variable", "feature": "cool", "context_path": ["desktop"]},
             "right": {"kind": "variable", "feature": "max_draw", "context_path": ["desktop"]}}
        ]
    })
}

pub fn catalog() -> Catalog {
    serde_json::from_value(catalog_json()).expect("catalog fixture deserializes")
}

pub fn kb() -> InMemoryKnowledgeBase {
    InMemoryKnowledgeBase::from_catalog(catalog())
        .expect("catalog fixture is consistent")
        .with_range_limit(ResolutionConfig::default().max_range_values)
}

pub fn service() -> ResolutionService {
    ResolutionService::new(Arc::new(kb()), ResolutionConfig::default())
}

pub fn open_session(svc: &ResolutionService) -> SessionId {
    let response = svc.init(Metadata::default().with_client("tests"));
    assert!(response.is_ok(), "init failed: {:?}", response.errors);
    response.session_id.expect("init returns a session id")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
