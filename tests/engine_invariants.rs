//! Engine Invariant Tests
//!
//! End-to-end properties of the schema engine:
//! - Loading a conforming raw map yields an instance that validates clean
//! - Dump round-trips through load
//! - Cyclic value graphs terminate with a circular-reference marker
//! - Example generation is bounded and produces valid instances
//! - Unknown keys are rejected at the documented points
//! - Validation is deterministic

use std::sync::Arc;

use formwork::{
    Attribute, AttrType, CollectionType, ContainerOptions, ContainerType, Error, Key, Requirement,
    StructuredMap, Value,
};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn address_type() -> Arc<ContainerType> {
    ContainerType::define("Address", ContainerOptions::default(), |_, schema| {
        schema.attribute("city", Attribute::required(AttrType::string()));
        schema.attribute("zip", Attribute::required(AttrType::string()));
        Ok(())
    })
}

fn user_type() -> Arc<ContainerType> {
    let address = address_type();
    let tags = CollectionType::of(AttrType::string());
    ContainerType::define("User", ContainerOptions::default(), move |_, schema| {
        schema.attribute("id", Attribute::required(AttrType::string()));
        schema.attribute("name", Attribute::optional(AttrType::string()));
        schema.attribute(
            "age",
            Attribute::optional(AttrType::integer()).with_default(json!(21)),
        );
        schema.attribute("address", Attribute::optional(AttrType::container(address.clone())));
        schema.attribute("tags", Attribute::optional(AttrType::collection(tags.clone())));
        Ok(())
    })
}

fn node_type() -> Arc<ContainerType> {
    ContainerType::define("Node", ContainerOptions::default(), |this, schema| {
        schema.attribute("label", Attribute::required(AttrType::string()));
        schema.attribute("next", Attribute::optional(AttrType::container(this.clone())));
        Ok(())
    })
}

fn load(ty: &Arc<ContainerType>, raw: serde_json::Value) -> StructuredMap {
    ty.load(Value::from(raw)).unwrap().unwrap()
}

// =============================================================================
// Load/Validate Round Trips
// =============================================================================

/// A conforming raw map loads into an instance with no validation errors.
#[test]
fn test_conforming_input_validates_clean() {
    let ty = user_type();
    let user = load(
        &ty,
        json!({
            "id": "u1",
            "name": "Alice",
            "address": {"city": "Porto", "zip": "4000"},
            "tags": ["admin", "ops"]
        }),
    );
    assert!(user.validate().is_empty());
}

/// Dumping and reloading produces an equal instance.
#[test]
fn test_dump_round_trips_through_load() {
    let ty = user_type();
    let user = load(
        &ty,
        json!({
            "id": "u1",
            "name": "Alice",
            "address": {"city": "Porto", "zip": "4000"},
            "tags": ["admin"]
        }),
    );

    let dumped = user.dump().unwrap();
    let reloaded = ty.load(Value::from(dumped.clone())).unwrap().unwrap();
    assert_eq!(user, reloaded);
    assert_eq!(reloaded.dump().unwrap(), dumped);
}

/// JSON text is an accepted input encoding and round-trips through dump.
#[test]
fn test_json_text_input_round_trips() {
    let ty = user_type();
    let user = ty
        .load("{\"id\": \"u1\", \"tags\": [\"a\"]}")
        .unwrap()
        .unwrap();
    let dumped = user.dump().unwrap();
    assert_eq!(dumped["id"], "u1");
    assert_eq!(dumped["tags"], json!(["a"]));
    // The back-filled default is part of the dumped tree.
    assert_eq!(dumped["age"], 21);
}

/// Validation reports every problem in one pass.
#[test]
fn test_validation_accumulates_all_errors() {
    let ty = user_type();
    let user = load(
        &ty,
        json!({
            "name": "NoId",
            "address": {"city": "Porto"}
        }),
    );

    let errors = user.validate();
    // Missing required id, and missing required zip inside address.
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.contains("$.key(id)")));
    assert!(errors.iter().any(|e| e.contains("$.key(address).key(zip)")));
}

/// Same instance validates the same way every time.
#[test]
fn test_validation_is_deterministic() {
    let ty = user_type();
    let user = load(&ty, json!({"name": "NoId"}));
    let first = user.validate();
    for _ in 0..50 {
        assert_eq!(user.validate(), first);
    }
}

// =============================================================================
// Requirement Scenarios
// =============================================================================

/// Exclusive group: both present yields exactly one error, one present
/// yields none.
#[test]
fn test_exclusive_requirement_scenario() {
    let ty = ContainerType::define("Choice", ContainerOptions::default(), |_, schema| {
        schema.attribute("a", Attribute::optional(AttrType::string()));
        schema.attribute("b", Attribute::optional(AttrType::string()));
        schema.requirement(Requirement::exclusive(["a", "b"]));
        Ok(())
    });

    let both = load(&ty, json!({"a": "x", "b": "y"}));
    let errors = both.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("mutually exclusive"));

    let one = load(&ty, json!({"a": "x"}));
    assert!(one.validate().is_empty());
}

// =============================================================================
// Case-Insensitive Lookup
// =============================================================================

/// Any casing of a declared field resolves to the same stored value.
#[test]
fn test_case_insensitive_lookup_resolves_to_one_field() {
    let ty = ContainerType::define(
        "Header",
        ContainerOptions {
            case_insensitive_load: true,
            ..ContainerOptions::default()
        },
        |_, schema| {
            schema.attribute("Name", Attribute::required(AttrType::string()));
            Ok(())
        },
    );

    let lower = load(&ty, json!({"name": "x"}));
    let upper = load(&ty, json!({"NAME": "x"}));
    assert_eq!(lower, upper);
    assert_eq!(lower.get("nAmE").unwrap(), Some(Value::from("x")));
    assert!(lower.validate().is_empty());
}

// =============================================================================
// Unknown-Key Policies
// =============================================================================

/// Strict schemas reject unknown keys while loading, because per-field
/// loading routes every entry through `set`.
#[test]
fn test_unknown_key_rejected_while_loading() {
    let ty = ContainerType::define("OnlyId", ContainerOptions::default(), |_, schema| {
        schema.attribute("id", Attribute::required(AttrType::integer()));
        Ok(())
    });

    let err = ty.load(Value::from(json!({"id": 1, "extra": 2}))).unwrap_err();
    let Error::UnknownKey { key, context } = err else {
        panic!("expected unknown-key error");
    };
    assert_eq!(key, "extra");
    assert_eq!(context.to_string(), "$.key(extra)");
}

/// Raw index assignment bypasses the schema; validation then reports the
/// unexpected key, exactly once, and preempts deeper validation.
#[test]
fn test_unknown_key_rejected_at_validation_after_raw_insert() {
    let ty = ContainerType::define("OnlyId", ContainerOptions::default(), |_, schema| {
        schema.attribute("id", Attribute::required(AttrType::integer()));
        Ok(())
    });

    let instance = load(&ty, json!({"id": 1}));
    instance.insert(Key::from("extra"), Value::Int(2));

    let errors = instance.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("extra"));
}

/// Unknown get/set on a strict schema fails immediately with the full
/// context path.
#[test]
fn test_unknown_get_and_set_fail_immediately() {
    let ty = user_type();
    let user = load(&ty, json!({"id": "u1"}));

    let err = user.set("bogus", Value::Int(1)).unwrap_err();
    assert!(err.to_string().contains("bogus"));
    assert!(err.to_string().contains("$.key(bogus)"));

    assert!(matches!(user.get("bogus"), Err(Error::UnknownKey { .. })));
}

// =============================================================================
// Cyclic Value Graphs
// =============================================================================

/// A value graph containing itself dumps to a finite tree with the
/// circular slot rendered as the fixed marker.
#[test]
fn test_cyclic_graph_dump_terminates() {
    let ty = node_type();
    let a = load(&ty, json!({"label": "a"}));
    let b = load(&ty, json!({"label": "b"}));
    a.set("next", Value::Map(b.clone())).unwrap();
    b.set("next", Value::Map(a.clone())).unwrap();

    let dumped = a.dump().unwrap();
    assert_eq!(dumped["next"]["next"], json!("..."));

    // A self-loop terminates too.
    let selfish = load(&ty, json!({"label": "s"}));
    selfish.set("next", Value::Map(selfish.clone())).unwrap();
    assert_eq!(selfish.dump().unwrap()["next"], json!("..."));
}

/// Validation across mutually-referencing instances terminates and stays
/// clean for conforming contents.
#[test]
fn test_cyclic_graph_validation_terminates() {
    let ty = node_type();
    let a = load(&ty, json!({"label": "a"}));
    let b = load(&ty, json!({"label": "b"}));
    a.set("next", Value::Map(b.clone())).unwrap();
    b.set("next", Value::Map(a.clone())).unwrap();

    assert!(a.validate().is_empty());
    assert!(b.validate().is_empty());
}

// =============================================================================
// Example Generation
// =============================================================================

/// Examples of a self-referential schema terminate, load, and validate.
#[test]
fn test_example_of_self_referential_schema_is_bounded_and_valid() {
    let ty = node_type();
    for _ in 0..5 {
        let example = ty.example().unwrap();
        assert!(example.validate().is_empty());

        let reloaded = ty.load(Value::from(example.dump().unwrap())).unwrap().unwrap();
        assert!(reloaded.validate().is_empty());
    }
}

/// Examples honor exactly/exclusive requirements.
#[test]
fn test_examples_satisfy_requirements() {
    let ty = ContainerType::define("Picky", ContainerOptions::default(), |_, schema| {
        schema.attribute("a", Attribute::optional(AttrType::string()));
        schema.attribute("b", Attribute::optional(AttrType::string()));
        schema.attribute("c", Attribute::optional(AttrType::integer()));
        schema.requirement(Requirement::exactly(1, ["a", "b"]));
        Ok(())
    });

    for _ in 0..10 {
        let example = ty.example().unwrap();
        assert!(example.validate().is_empty());
    }
}

// =============================================================================
// Definition Faults
// =============================================================================

/// A broken definition fails on first use and on every use after that.
#[test]
fn test_definition_faults_resurface_on_every_use() {
    let ty = ContainerType::define("Busted", ContainerOptions::default(), |_, schema| {
        schema.attribute("a", Attribute::optional(AttrType::string()));
        schema.requirement(Requirement::all(["a", "ghost"]));
        Ok(())
    });

    for _ in 0..3 {
        let err = ty.load(Value::from(json!({"a": "x"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
        assert!(err.to_string().contains("ghost"));
    }
}
