#![allow(missing_docs)]

use futures_lite::future::block_on;
use vivicode::{
    deserialize, serialize_async, structurally_eq, JsValue, ObjectKind, PromiseState, Result,
    StreamMessage,
};

fn unwrap_promise(value: &JsValue) -> JsValue {
    match &*value.as_object().expect("promise object").kind() {
        ObjectKind::Promise(PromiseState::Resolved(inner)) => inner.clone(),
        other => panic!("expected resolved promise, got {other:?}"),
    }
}

// --- TESTS ---

#[test]
fn resolved_promises_round_trip() -> Result<()> {
    let promise = JsValue::promise_resolved(JsValue::number(42.0));
    let source = block_on(serialize_async(&promise))?;
    assert_eq!(source, "Promise.resolve(42)");

    let back = deserialize(&source)?;
    assert!(matches!(unwrap_promise(&back), JsValue::Number(n) if n == 42.0));
    Ok(())
}

#[test]
fn pending_promises_are_awaited() -> Result<()> {
    let promise = JsValue::promise_pending(async {
        futures_lite::future::yield_now().await;
        Ok(JsValue::string("late"))
    });
    let source = block_on(serialize_async(&promise))?;
    let back = deserialize(&source)?;
    assert!(matches!(unwrap_promise(&back), JsValue::String(s) if &*s == "late"));
    Ok(())
}

#[test]
fn promise_cycles_use_a_thunk() -> Result<()> {
    // The object owns a promise that resolves to the object itself, so the
    // payload reference is only bound after the promise expression.
    let obj = JsValue::empty_object();
    obj.set_prop("p", JsValue::promise_resolved(obj.clone()));
    let source = block_on(serialize_async(&obj))?;
    assert!(source.contains("Promise.resolve().then("), "no thunk in {source}");

    let back = deserialize(&source)?;
    let promise = match &*back.as_object().expect("object").kind() {
        ObjectKind::Plain { props, .. } => props[0].1.clone(),
        other => panic!("expected plain object, got {other:?}"),
    };
    assert_eq!(unwrap_promise(&promise).identity(), back.identity());
    Ok(())
}

#[test]
fn blobs_round_trip_bytes_and_type() -> Result<()> {
    let blob = JsValue::blob("text/plain", b"Hello World".to_vec());
    let source = block_on(serialize_async(&blob))?;
    let back = deserialize(&source)?;
    match &*back.as_object().expect("blob").kind() {
        ObjectKind::Blob {
            content_type,
            bytes,
        } => {
            assert_eq!(content_type, "text/plain");
            assert_eq!(bytes, b"Hello World");
        }
        other => panic!("expected blob, got {other:?}"),
    }
    Ok(())
}

#[test]
fn files_round_trip_metadata() -> Result<()> {
    let file = JsValue::file("notes.txt", "text/plain", 1_700_000_000_000.0, b"abc".to_vec());
    let source = block_on(serialize_async(&file))?;
    assert!(source.contains("lastModified:1700000000000"));
    assert!(structurally_eq(&file, &deserialize(&source)?));
    Ok(())
}

#[test]
fn streams_are_drained_and_replayed() -> Result<()> {
    let source_stream = futures_lite::stream::iter(vec![
        StreamMessage::Next(JsValue::number(1.0)),
        StreamMessage::Next(JsValue::string("two")),
        StreamMessage::Close,
    ]);
    let stream = JsValue::stream(Box::pin(source_stream));
    let source = block_on(serialize_async(&stream))?;
    assert!(source.contains("new ReadableStream"));

    let back = deserialize(&source)?;
    match &*back.as_object().expect("stream").kind() {
        ObjectKind::Stream(contents) => {
            assert_eq!(contents.events.len(), 3);
            assert!(matches!(contents.events[0], StreamMessage::Next(JsValue::Number(n)) if n == 1.0));
            assert!(matches!(contents.events[2], StreamMessage::Close));
        }
        other => panic!("expected stream, got {other:?}"),
    }
    Ok(())
}

#[test]
fn errored_streams_preserve_the_payload() -> Result<()> {
    let source_stream = futures_lite::stream::iter(vec![
        StreamMessage::Next(JsValue::number(1.0)),
        StreamMessage::Error(JsValue::string("broken")),
    ]);
    let stream = JsValue::stream(Box::pin(source_stream));
    let source = block_on(serialize_async(&stream))?;
    assert!(source.contains("c.error("));

    let back = deserialize(&source)?;
    match &*back.as_object().expect("stream").kind() {
        ObjectKind::Stream(contents) => {
            assert!(matches!(
                &contents.events[1],
                StreamMessage::Error(JsValue::String(s)) if &**s == "broken"
            ));
        }
        other => panic!("expected stream, got {other:?}"),
    }
    Ok(())
}

#[test]
fn requests_and_responses_round_trip() -> Result<()> {
    let body = JsValue::array_buffer(b"payload".to_vec());
    let request = JsValue::request(
        "https://api.example.com/items",
        JsValue::object(vec![
            ("method", JsValue::string("POST")),
            ("body", body),
        ]),
    );
    let source = block_on(serialize_async(&request))?;
    assert!(source.starts_with("new Request(\"https://api.example.com/items\""));
    assert!(structurally_eq(&request, &deserialize(&source)?));

    let response = JsValue::response(
        Some(JsValue::array_buffer(b"ok".to_vec())),
        JsValue::object(vec![("status", JsValue::number(200.0))]),
    );
    let source = block_on(serialize_async(&response))?;
    assert!(structurally_eq(&response, &deserialize(&source)?));
    Ok(())
}

#[test]
fn form_data_with_files_round_trips() -> Result<()> {
    let form = JsValue::form_data(vec![
        ("note", JsValue::string("hi")),
        ("upload", JsValue::file("a.bin", "application/octet-stream", 0.0, vec![1, 2])),
    ]);
    let source = block_on(serialize_async(&form))?;
    assert!(structurally_eq(&form, &deserialize(&source)?));
    Ok(())
}

#[test]
fn async_parse_still_rejects_unknown_values() {
    let foreign = JsValue::foreign(std::rc::Rc::new(42u32));
    assert!(block_on(serialize_async(&foreign)).is_err());
}
