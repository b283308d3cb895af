#![allow(missing_docs)]

use vivicode::{deserialize, structurally_eq, Feature, JsValue, Result, Vivicode, VivicodeError};

fn cyclic() -> JsValue {
    let obj = JsValue::empty_object();
    obj.set_prop("me", obj.clone());
    obj
}

fn iterable() -> JsValue {
    let obj = JsValue::object(vec![("tag", JsValue::string("it"))]);
    obj.set_iterator(vec![JsValue::number(1.0), JsValue::number(2.0)]);
    obj
}

// --- TESTS ---

#[test]
fn disabled_arrow_functions_never_appear() -> Result<()> {
    let pipeline = Vivicode::builder().disable(Feature::ARROW_FUNCTION);

    let source = pipeline.serialize(&cyclic())?;
    assert!(!source.contains("=>"), "arrow leaked into {source}");
    assert!(source.contains("function"));

    let promise = JsValue::promise_resolved(cyclic());
    let source =
        futures_lite::future::block_on(pipeline.serialize_async(&promise))?;
    assert!(!source.contains("=>"), "arrow leaked into {source}");
    Ok(())
}

#[test]
fn disabled_object_assign_never_appears() -> Result<()> {
    let pipeline = Vivicode::builder().disable(Feature::OBJECT_ASSIGN);
    let value = JsValue::null_proto_object(vec![
        ("a", JsValue::number(1.0)),
        ("weird key", JsValue::number(2.0)),
    ]);
    let source = pipeline.serialize(&value)?;
    assert!(
        !source.contains("Object.assign"),
        "Object.assign leaked into {source}"
    );
    let back = deserialize(&source)?;
    assert!(structurally_eq(&value, &back));
    Ok(())
}

#[test]
fn disabled_array_values_never_appears() -> Result<()> {
    let pipeline = Vivicode::builder().disable(Feature::ARRAY_PROTOTYPE_VALUES);
    let source = pipeline.serialize(&iterable())?;
    assert!(
        !source.contains(".values()"),
        ".values() leaked into {source}"
    );
    let back = deserialize(&source)?;
    assert!(structurally_eq(&iterable(), &back));
    Ok(())
}

#[test]
fn iterator_polyfill_without_arrows_or_shorthand() -> Result<()> {
    let pipeline = Vivicode::builder().disable(
        Feature::ARRAY_PROTOTYPE_VALUES | Feature::ARROW_FUNCTION | Feature::METHOD_SHORTHAND,
    );
    let source = pipeline.serialize(&iterable())?;
    assert!(!source.contains("=>"));
    assert!(!source.contains(".values()"));
    let back = deserialize(&source)?;
    assert!(structurally_eq(&iterable(), &back));
    Ok(())
}

#[test]
fn values_needing_disabled_features_are_rejected() {
    let map = JsValue::map(vec![(JsValue::number(1.0), JsValue::number(2.0))]);
    let err = Vivicode::builder()
        .disable(Feature::MAP)
        .serialize(&map)
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("Map"));

    let err = Vivicode::builder()
        .disable(Feature::BIGINT)
        .serialize(&JsValue::bigint("1"))
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("BigInt"));

    let err = Vivicode::builder()
        .disable(Feature::SET)
        .serialize(&JsValue::set(vec![]))
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("Set"));

    let err = Vivicode::builder()
        .disable(Feature::WEB_API)
        .serialize(&JsValue::url("https://x"))
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("URL"));

    let buffer = JsValue::array_buffer(vec![1]);
    let err = Vivicode::builder()
        .disable(Feature::TYPED_ARRAY)
        .serialize(&buffer)
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("ArrayBuffer"));
}

#[test]
fn aggregate_error_downgrades_instead_of_failing() -> Result<()> {
    let aggregate = JsValue::aggregate_error(
        "many",
        vec![JsValue::error(vivicode::ErrorKind::Error, "one")],
    );
    let source = Vivicode::builder()
        .disable(Feature::AGGREGATE_ERROR)
        .serialize(&aggregate)?;
    assert!(!source.contains("AggregateError"), "constructor leaked into {source}");
    assert!(source.contains("new Error(\"many\")"));
    Ok(())
}

#[test]
fn bigint_views_require_their_own_bit() {
    let buffer = JsValue::array_buffer(vec![0; 8]);
    let view = JsValue::typed_array(vivicode::TypedArrayKind::BigInt64, buffer, 0, 1);
    let err = Vivicode::builder()
        .disable(Feature::BIGINT_TYPED_ARRAY)
        .serialize(&view)
        .unwrap_err();
    assert_eq!(err, VivicodeError::FeatureDisabled("BigInt64Array"));
}
