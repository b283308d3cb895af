#![allow(missing_docs)]

use vivicode::{
    compile_json, deserialize, from_json, serialize, structurally_eq, to_json, JsValue, JsonNode,
    Result,
};

fn cyclic() -> JsValue {
    let obj = JsValue::object(vec![("n", JsValue::number(1.0))]);
    obj.set_prop("me", obj.clone());
    obj
}

// --- TESTS ---

#[test]
fn json_form_round_trips_values() -> Result<()> {
    let value = JsValue::object(vec![
        ("list", JsValue::array(vec![JsValue::number(1.0), JsValue::Null])),
        ("name", JsValue::string("x")),
    ]);
    let tree = to_json(&value)?;
    let back = from_json(&tree)?;
    assert!(structurally_eq(&value, &back));
    Ok(())
}

#[test]
fn json_form_preserves_cycles() -> Result<()> {
    let value = cyclic();
    let back = from_json(&to_json(&value)?)?;
    assert!(structurally_eq(&value, &back));
    if let vivicode::ObjectKind::Plain { props, .. } = &*back.as_object().unwrap().kind() {
        let me = props.iter().find(|(k, _)| k == "me").unwrap().1.clone();
        assert_eq!(me.identity(), back.identity());
    }
    Ok(())
}

#[test]
fn compile_json_matches_direct_serialization() -> Result<()> {
    let value = cyclic();
    let direct = serialize(&value)?;
    let compiled = compile_json(&to_json(&value)?)?;
    assert_eq!(direct, compiled);
    Ok(())
}

#[test]
fn json_transport_through_serde_is_lossless() -> Result<()> {
    let value = JsValue::map(vec![(
        JsValue::string("k"),
        JsValue::array_with_holes(vec![None, Some(JsValue::number(2.0))]),
    )]);
    let tree = to_json(&value)?;
    let text = serde_json::to_string(&tree).expect("serializable tree");
    let parsed: JsonNode = serde_json::from_str(&text).expect("parseable tree");
    assert_eq!(tree, parsed);

    let back = from_json(&parsed)?;
    assert!(structurally_eq(&value, &back));
    Ok(())
}

#[test]
fn compiled_json_still_evaluates() -> Result<()> {
    let value = cyclic();
    let compiled = compile_json(&to_json(&value)?)?;
    let back = deserialize(&compiled)?;
    assert!(structurally_eq(&value, &back));
    Ok(())
}

#[test]
fn sparse_fields_are_omitted() -> Result<()> {
    let tree = to_json(&JsValue::number(1.0))?;
    let text = serde_json::to_string(&tree).expect("serializable tree");
    assert_eq!(text, r#"{"t":0,"s":1.0}"#);
    Ok(())
}

#[test]
fn caller_supplied_ref_tables_link_separate_trees() -> Result<()> {
    use std::cell::RefCell;
    use std::rc::Rc;

    // Two IR trees sharing one id space: the second is just a back-
    // reference into the first.
    let first = JsonNode {
        t: 7,
        i: Some(0),
        p: Some(vivicode::JsonRecord {
            k: vec![serde_json::Value::String("x".into())],
            v: vec![JsonNode {
                t: 0,
                s: Some(serde_json::json!(1.0)),
                ..JsonNode::default()
            }],
            s: 1,
        }),
        ..JsonNode::default()
    };
    let second = JsonNode {
        t: 4,
        i: Some(0),
        ..JsonNode::default()
    };

    let refs = Rc::new(RefCell::new(std::collections::HashMap::new()));
    let pipeline = vivicode::Vivicode::builder();
    let a = pipeline.from_json_with_refs(&first, Rc::clone(&refs))?;
    let b = pipeline.from_json_with_refs(&second, refs)?;
    assert_eq!(a.identity(), b.identity());
    Ok(())
}

#[test]
fn malformed_trees_are_rejected() {
    // Unknown tag.
    let bad = JsonNode {
        t: 200,
        ..JsonNode::default()
    };
    assert!(compile_json(&bad).is_err());
    assert!(from_json(&bad).is_err());

    // Indexed value with no id.
    let bad = JsonNode {
        t: 4,
        ..JsonNode::default()
    };
    assert!(compile_json(&bad).is_err());

    // Dangling back-reference.
    let bad = JsonNode {
        t: 4,
        i: Some(9),
        ..JsonNode::default()
    };
    assert!(from_json(&bad).is_err());
}
