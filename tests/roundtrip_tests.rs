#![allow(missing_docs)]

use vivicode::{
    deserialize, serialize, structurally_eq, ErrorKind, JsValue, ObjectFlag, ObjectKind,
    PromiseState, Result, TypedArrayKind, WellKnownSymbol,
};

// --- MOCK DATA ---

fn cyclic_object() -> JsValue {
    let obj = JsValue::empty_object();
    obj.set_prop("self", obj.clone());
    obj
}

fn prop(value: &JsValue, key: &str) -> JsValue {
    match value.as_object().map(|o| o.kind()) {
        Some(kind) => match &*kind {
            ObjectKind::Plain { props, .. } => props
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(JsValue::Undefined),
            _ => JsValue::Undefined,
        },
        None => JsValue::Undefined,
    }
}

// --- TESTS ---

/// The `Infinity` literal strategy must survive JSON-ish transport, so the
/// emitted form is a division.
#[test]
fn infinity_uses_the_division_strategy() -> Result<()> {
    assert_eq!(serialize(&JsValue::number(f64::INFINITY))?, "1/0");
    assert_eq!(serialize(&JsValue::number(f64::NEG_INFINITY))?, "-1/0");
    assert_eq!(serialize(&JsValue::number(f64::NAN))?, "0/0");
    assert_eq!(serialize(&JsValue::number(-0.0))?, "-0");
    Ok(())
}

#[test]
fn infinity_round_trips_to_infinity() -> Result<()> {
    let back = deserialize(&serialize(&JsValue::number(f64::INFINITY))?)?;
    assert!(matches!(back, JsValue::Number(n) if n == f64::INFINITY));
    Ok(())
}

#[test]
fn plain_objects_are_statement_safe() -> Result<()> {
    let obj = JsValue::object(vec![("a", JsValue::number(1.0))]);
    assert_eq!(serialize(&obj)?, "({a:1})");
    Ok(())
}

#[test]
fn primitives_round_trip() -> Result<()> {
    let values = vec![
        JsValue::Undefined,
        JsValue::Null,
        JsValue::Bool(true),
        JsValue::Bool(false),
        JsValue::number(0.5),
        JsValue::number(-3.25),
        JsValue::string("with \"quotes\" and </script>"),
        JsValue::bigint("12345678901234567890"),
    ];
    for value in values {
        let back = deserialize(&serialize(&value)?)?;
        assert!(
            structurally_eq(&value, &back),
            "round trip changed {value:?} into {back:?}"
        );
    }
    Ok(())
}

#[test]
fn self_cycle_preserves_identity() -> Result<()> {
    let source = serialize(&cyclic_object())?;
    let back = deserialize(&source)?;
    assert_eq!(back.identity(), prop(&back, "self").identity());
    Ok(())
}

#[test]
fn shared_subvalues_keep_reference_identity() -> Result<()> {
    let shared = JsValue::object(vec![("tag", JsValue::string("shared"))]);
    let root = JsValue::array(vec![shared.clone(), shared]);
    let back = deserialize(&serialize(&root)?)?;
    if let Some(obj) = back.as_object() {
        if let ObjectKind::Array { items, .. } = &*obj.kind() {
            let a = items[0].clone().unwrap();
            let b = items[1].clone().unwrap();
            assert_eq!(a.identity(), b.identity());
            return Ok(());
        }
    }
    panic!("expected an array back");
}

#[test]
fn holes_preserve_length_and_membership() -> Result<()> {
    let holey = JsValue::array_with_holes(vec![
        None,
        Some(JsValue::number(1.0)),
        None,
        None,
    ]);
    let source = serialize(&holey)?;
    assert_eq!(source, "[,1,,,]");
    let back = deserialize(&source)?;
    assert!(structurally_eq(&holey, &back));
    Ok(())
}

#[test]
fn sets_preserve_order() -> Result<()> {
    let set = JsValue::set(vec![JsValue::number(1.0), JsValue::number(2.0)]);
    assert_eq!(serialize(&set)?, "new Set([1,2])");
    let back = deserialize("new Set([1,2])")?;
    assert!(structurally_eq(&set, &back));
    Ok(())
}

#[test]
fn map_self_cycle_round_trips() -> Result<()> {
    let map = JsValue::map(vec![]);
    map.map_set(map.clone(), map.clone());
    let back = deserialize(&serialize(&map)?)?;
    if let Some(obj) = back.as_object() {
        if let ObjectKind::Map { entries } = &*obj.kind() {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].0.identity(), back.identity());
            assert_eq!(entries[0].1.identity(), back.identity());
            return Ok(());
        }
    }
    panic!("expected a map back");
}

#[test]
fn map_cycle_with_late_shared_value() -> Result<()> {
    // The map key is the map itself; the value is a marked definition that
    // is also referenced later, exercising the defer slot.
    let map = JsValue::map(vec![]);
    let shared = JsValue::object(vec![("n", JsValue::number(7.0))]);
    map.map_set(map.clone(), shared.clone());
    let root = JsValue::array(vec![map.clone(), shared]);

    let back = deserialize(&serialize(&root)?)?;
    if let Some(obj) = back.as_object() {
        if let ObjectKind::Array { items, .. } = &*obj.kind() {
            let map_back = items[0].clone().unwrap();
            let shared_back = items[1].clone().unwrap();
            if let Some(map_obj) = map_back.as_object() {
                if let ObjectKind::Map { entries } = &*map_obj.kind() {
                    assert_eq!(entries.len(), 1);
                    assert_eq!(entries[0].0.identity(), map_back.identity());
                    assert_eq!(entries[0].1.identity(), shared_back.identity());
                    return Ok(());
                }
            }
        }
    }
    panic!("expected array [map, shared] back");
}

#[test]
fn dates_and_regexps_round_trip() -> Result<()> {
    let date = JsValue::date(1_700_000_000_000.0);
    assert_eq!(serialize(&date)?, "new Date(1700000000000)");
    assert!(structurally_eq(&date, &deserialize(&serialize(&date)?)?));

    let regexp = JsValue::regexp("a[b/c]+", "gi");
    assert!(structurally_eq(
        &regexp,
        &deserialize(&serialize(&regexp)?)?
    ));
    Ok(())
}

#[test]
fn errors_round_trip_with_options() -> Result<()> {
    let error = JsValue::error(ErrorKind::Type, "boom");
    if let Some(obj) = error.as_object() {
        if let ObjectKind::Error { props, .. } = &mut *obj.kind_mut() {
            props.push(("code".into(), JsValue::number(42.0)));
        }
    }
    let source = serialize(&error)?;
    assert!(source.contains("new TypeError(\"boom\")"));
    let back = deserialize(&source)?;
    assert!(structurally_eq(&error, &back));
    Ok(())
}

#[test]
fn aggregate_errors_round_trip() -> Result<()> {
    let inner = JsValue::error(ErrorKind::Error, "first");
    let aggregate = JsValue::aggregate_error("many", vec![inner]);
    let back = deserialize(&serialize(&aggregate)?)?;
    assert!(structurally_eq(&aggregate, &back));
    Ok(())
}

#[test]
fn boxed_primitives_round_trip() -> Result<()> {
    let boxed = JsValue::boxed(JsValue::string("inner"));
    assert_eq!(serialize(&boxed)?, "Object(\"inner\")");
    assert!(structurally_eq(&boxed, &deserialize(&serialize(&boxed)?)?));
    Ok(())
}

#[test]
fn typed_array_views_share_their_buffer() -> Result<()> {
    let buffer = JsValue::array_buffer(vec![1, 2, 3, 4]);
    let bytes = JsValue::typed_array(TypedArrayKind::Uint8, buffer.clone(), 0, 4);
    let words = JsValue::typed_array(TypedArrayKind::Int16, buffer, 0, 2);
    let root = JsValue::array(vec![bytes, words]);

    let back = deserialize(&serialize(&root)?)?;
    assert!(structurally_eq(&root, &back));
    if let Some(obj) = back.as_object() {
        if let ObjectKind::Array { items, .. } = &*obj.kind() {
            let first = items[0].clone().unwrap();
            let second = items[1].clone().unwrap();
            let buffer_of = |view: &JsValue| match &*view.as_object().unwrap().kind() {
                ObjectKind::TypedArray { buffer, .. } => buffer.identity(),
                _ => None,
            };
            assert_eq!(buffer_of(&first), buffer_of(&second));
            return Ok(());
        }
    }
    panic!("expected array of views back");
}

#[test]
fn null_prototype_objects_round_trip() -> Result<()> {
    let obj = JsValue::null_proto_object(vec![("k", JsValue::number(1.0))]);
    let source = serialize(&obj)?;
    assert!(source.contains("Object.create(null)"));
    assert!(structurally_eq(&obj, &deserialize(&source)?));
    Ok(())
}

#[test]
fn integrity_flags_are_applied_after_patches() -> Result<()> {
    let obj = cyclic_object();
    obj.set_flag(ObjectFlag::Frozen);
    let source = serialize(&obj)?;
    let freeze = source.find("Object.freeze").expect("freeze missing");
    let patch = source.find(".self=").expect("patch missing");
    assert!(patch < freeze, "flag applied before patch in {source}");

    let back = deserialize(&source)?;
    match back.as_object().map(|o| o.kind()) {
        Some(kind) => match &*kind {
            ObjectKind::Plain { flag, .. } => assert_eq!(*flag, ObjectFlag::Frozen),
            _ => panic!("expected plain object"),
        },
        None => panic!("expected object back"),
    }
    Ok(())
}

#[test]
fn iterable_objects_round_trip() -> Result<()> {
    let obj = JsValue::object(vec![("name", JsValue::string("seq"))]);
    obj.set_iterator(vec![
        JsValue::number(1.0),
        JsValue::number(2.0),
        JsValue::number(3.0),
    ]);
    let source = serialize(&obj)?;
    assert!(source.contains("Symbol.iterator"));
    assert!(structurally_eq(&obj, &deserialize(&source)?));
    Ok(())
}

#[test]
fn well_known_symbols_round_trip() -> Result<()> {
    let symbol = JsValue::Symbol(WellKnownSymbol::Iterator);
    assert_eq!(serialize(&symbol)?, "Symbol.iterator");
    assert!(matches!(
        deserialize("Symbol.iterator")?,
        JsValue::Symbol(WellKnownSymbol::Iterator)
    ));
    Ok(())
}

#[test]
fn web_api_values_round_trip() -> Result<()> {
    let url = JsValue::url("https://example.com/path?x=1");
    assert!(structurally_eq(&url, &deserialize(&serialize(&url)?)?));

    let params = JsValue::url_search_params(vec![("q", "a b"), ("lang", "en")]);
    assert!(structurally_eq(&params, &deserialize(&serialize(&params)?)?));

    let headers = JsValue::headers(vec![("content-type", "text/html")]);
    assert!(structurally_eq(&headers, &deserialize(&serialize(&headers)?)?));

    let form = JsValue::form_data(vec![("field", JsValue::string("value"))]);
    assert!(structurally_eq(&form, &deserialize(&serialize(&form)?)?));

    let event = JsValue::event(
        "click",
        JsValue::object(vec![("bubbles", JsValue::Bool(true))]),
    );
    assert!(structurally_eq(&event, &deserialize(&serialize(&event)?)?));

    let exception = JsValue::dom_exception("not found", "NotFoundError");
    assert!(structurally_eq(
        &exception,
        &deserialize(&serialize(&exception)?)?
    ));
    Ok(())
}

#[test]
fn promises_are_rejected_by_the_sync_path() {
    let promise = JsValue::promise_resolved(JsValue::number(1.0));
    assert!(serialize(&promise).is_err());

    let holder = JsValue::object(vec![("p", promise)]);
    assert!(serialize(&holder).is_err());
}

#[test]
fn rejected_promise_payloads_survive() -> Result<()> {
    // Reject is preserved in IR, not raised.
    let promise = JsValue::promise_rejected(JsValue::string("nope"));
    let source = futures_lite::future::block_on(vivicode::serialize_async(&promise))?;
    let back = deserialize(&source)?;
    match back.as_object().map(|o| o.kind()) {
        Some(kind) => match &*kind {
            ObjectKind::Promise(PromiseState::Rejected(payload)) => {
                assert!(matches!(payload, JsValue::String(s) if &**s == "nope"));
            }
            other => panic!("expected rejected promise, got {other:?}"),
        },
        None => panic!("expected promise back"),
    }
    Ok(())
}
