#![allow(missing_docs)]

use futures_lite::future::block_on;
use vivicode::{
    cross_serialize, structurally_eq, CrossOptions, Evaluator, JsValue, ObjectKind, Result,
};

fn array_item(value: &JsValue, index: usize) -> JsValue {
    match &*value.as_object().expect("array").kind() {
        ObjectKind::Array { items, .. } => items[index].clone().expect("dense item"),
        other => panic!("expected array, got {other:?}"),
    }
}

// --- TESTS ---

#[test]
fn output_is_bound_to_the_shared_table() -> Result<()> {
    let source = cross_serialize(&JsValue::object(vec![("x", JsValue::number(1.0))]), &CrossOptions::default())?;
    assert!(source.contains("$R[0]="), "no table binding in {source}");
    assert!(source.contains("self.$R=self.$R||[]"), "no header in {source}");
    Ok(())
}

#[test]
fn later_calls_extend_the_same_id_space() -> Result<()> {
    let options = CrossOptions::default();
    let shared = JsValue::object(vec![("tag", JsValue::string("shared"))]);

    let first = cross_serialize(&shared, &options)?;
    // The second expression only references the value serialized before.
    let second = cross_serialize(&JsValue::array(vec![shared.clone()]), &options)?;
    assert!(
        !second.contains("tag"),
        "second expression re-serialized the shared value: {second}"
    );

    let evaluator = Evaluator::new();
    let first_value = evaluator.eval(&first)?;
    let second_value = evaluator.eval(&second)?;
    assert_eq!(
        array_item(&second_value, 0).identity(),
        first_value.identity()
    );
    assert!(structurally_eq(&array_item(&second_value, 0), &shared));
    Ok(())
}

#[test]
fn repeated_roots_collapse_to_a_reference() -> Result<()> {
    let options = CrossOptions::default();
    let value = JsValue::set(vec![JsValue::number(5.0)]);

    let first = cross_serialize(&value, &options)?;
    let second = cross_serialize(&value, &options)?;
    assert!(first.len() > second.len());

    let evaluator = Evaluator::new();
    let a = evaluator.eval(&first)?;
    let b = evaluator.eval(&second)?;
    assert_eq!(a.identity(), b.identity());
    Ok(())
}

#[test]
fn scopes_namespace_the_table() -> Result<()> {
    let scoped = CrossOptions {
        scope_id: Some("widget".into()),
    };
    let source = cross_serialize(&JsValue::number(3.0), &scoped)?;
    assert!(source.contains("\"widget\""), "scope missing from {source}");

    // Ids from distinct scopes start over instead of colliding.
    let other = CrossOptions {
        scope_id: Some("other".into()),
    };
    let a = cross_serialize(&JsValue::empty_object(), &scoped)?;
    let b = cross_serialize(&JsValue::empty_object(), &other)?;
    assert!(a.contains("$R[0]=") || a.contains("$R[1]="));
    assert!(b.contains("$R[0]="));

    let evaluator = Evaluator::new();
    evaluator.eval(&a)?;
    evaluator.eval(&b)?;
    Ok(())
}

#[test]
fn cross_async_handles_promises() -> Result<()> {
    let options = CrossOptions::default();
    let promise = JsValue::promise_resolved(JsValue::string("done"));
    let source = block_on(vivicode::cross_serialize_async(&promise, &options))?;
    assert!(source.contains("Promise.resolve("));

    let evaluator = Evaluator::new();
    let value = evaluator.eval(&source)?;
    match &*value.as_object().expect("promise").kind() {
        ObjectKind::Promise(vivicode::PromiseState::Resolved(inner)) => {
            assert!(matches!(inner, JsValue::String(s) if &**s == "done"));
        }
        other => panic!("expected resolved promise, got {other:?}"),
    }
    Ok(())
}

#[test]
fn cycles_work_against_the_table() -> Result<()> {
    let obj = JsValue::empty_object();
    obj.set_prop("me", obj.clone());
    let source = cross_serialize(&obj, &CrossOptions::default())?;

    let evaluator = Evaluator::new();
    let value = evaluator.eval(&source)?;
    match &*value.as_object().expect("object").kind() {
        ObjectKind::Plain { props, .. } => {
            assert_eq!(props[0].1.identity(), value.identity());
        }
        other => panic!("expected plain object, got {other:?}"),
    }
    Ok(())
}
