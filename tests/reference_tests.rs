#![allow(missing_docs)]

use std::rc::Rc;

use vivicode::{
    Evaluator, JsValue, Plugin, ReferenceRegistry, Result, Vivicode, VivicodeError,
};

// --- MOCK PLUGIN ---

/// A plugin carrying an opaque numeric handle through the pipeline.
struct TicketPlugin;

#[derive(Debug, PartialEq)]
struct Ticket(u64);

impl Plugin for TicketPlugin {
    fn tag(&self) -> &str {
        "ticket"
    }

    fn test(&self, value: &JsValue) -> bool {
        match value.as_object() {
            Some(obj) => match &*obj.kind() {
                vivicode::ObjectKind::Foreign(handle) => handle.downcast_ref::<Ticket>().is_some(),
                _ => false,
            },
            None => false,
        }
    }

    fn parse(&self, value: &JsValue) -> Result<serde_json::Value> {
        let number = value
            .as_object()
            .and_then(|obj| match &*obj.kind() {
                vivicode::ObjectKind::Foreign(handle) => {
                    handle.downcast_ref::<Ticket>().map(|t| t.0)
                }
                _ => None,
            })
            .ok_or(VivicodeError::UnsupportedType("ticket"))?;
        Ok(serde_json::json!({ "n": number }))
    }

    fn serialize(&self, payload: &serde_json::Value) -> Result<String> {
        let n = payload["n"].as_u64().unwrap_or(0);
        Ok(format!("({n})"))
    }

    fn deserialize(&self, payload: &serde_json::Value) -> Result<JsValue> {
        let n = payload["n"].as_u64().unwrap_or(0);
        Ok(JsValue::foreign(Rc::new(Ticket(n))))
    }
}

// --- TESTS ---

#[test]
fn registered_handles_survive_by_identity() -> Result<()> {
    let registry = Rc::new(ReferenceRegistry::new());
    let handle = registry.register("app-config", JsValue::empty_object())?;

    let pipeline = Vivicode::builder().registry(Rc::clone(&registry));
    let source = pipeline.serialize(&JsValue::array(vec![handle.clone(), handle.clone()]))?;
    assert!(source.contains("self.$REFS[\"app-config\"]"));

    let evaluator = Evaluator::with_registry(&registry);
    let back = evaluator.eval(&source)?;
    if let vivicode::ObjectKind::Array { items, .. } = &*back.as_object().unwrap().kind() {
        assert_eq!(
            items[0].clone().unwrap().identity(),
            handle.identity(),
            "reference did not rehydrate to the registered handle"
        );
        assert_eq!(
            items[1].clone().unwrap().identity(),
            items[0].clone().unwrap().identity()
        );
    } else {
        panic!("expected array back");
    }
    Ok(())
}

#[test]
fn tag_collisions_fail() {
    let registry = ReferenceRegistry::new();
    registry.register("dup", JsValue::empty_object()).unwrap();
    let err = registry
        .register("dup", JsValue::empty_object())
        .unwrap_err();
    assert_eq!(err, VivicodeError::TagCollision("dup".into()));
}

#[test]
fn unregistered_foreign_values_fail_with_the_type_name() {
    let foreign = JsValue::foreign(Rc::new(Ticket(1)));
    let err = Vivicode::builder().serialize(&foreign).unwrap_err();
    assert_eq!(err, VivicodeError::UnsupportedType("foreign handle"));
}

#[test]
fn plugins_claim_foreign_values() -> Result<()> {
    let pipeline = Vivicode::builder().plugin(Rc::new(TicketPlugin));
    let value = JsValue::foreign(Rc::new(Ticket(99)));

    let source = pipeline.serialize(&value)?;
    assert_eq!(source, "(99)");

    let tree = pipeline.to_json(&value)?;
    let rebuilt = pipeline.from_json(&tree)?;
    let ticket = rebuilt
        .as_object()
        .and_then(|obj| match &*obj.kind() {
            vivicode::ObjectKind::Foreign(handle) => {
                handle.downcast_ref::<Ticket>().map(|t| t.0)
            }
            _ => None,
        })
        .expect("plugin value");
    assert_eq!(ticket, 99);
    Ok(())
}

#[test]
fn missing_plugins_surface_at_reconstruction() {
    let pipeline = Vivicode::builder().plugin(Rc::new(TicketPlugin));
    let tree = pipeline
        .to_json(&JsValue::foreign(Rc::new(Ticket(7))))
        .unwrap();

    // A pipeline without the plugin cannot resolve the tag.
    let bare = Vivicode::builder();
    assert_eq!(
        bare.compile_json(&tree).unwrap_err(),
        VivicodeError::MissingPlugin("ticket".into())
    );
    assert_eq!(
        bare.from_json(&tree).unwrap_err(),
        VivicodeError::MissingPlugin("ticket".into())
    );
}
