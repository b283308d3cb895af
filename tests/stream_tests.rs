#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_lite::future::block_on;
use vivicode::{
    cross_serialize_stream, CrossOptions, Evaluator, JsValue, ObjectKind, PromiseState, Result,
    StreamCallbacks, StreamMessage, Vivicode,
};

// --- HARNESS ---

struct Collected {
    chunks: Rc<RefCell<Vec<String>>>,
    done: Rc<Cell<u32>>,
    errors: Rc<RefCell<Vec<vivicode::VivicodeError>>>,
}

fn collector() -> (Collected, StreamCallbacks) {
    let chunks = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(0));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let callbacks = StreamCallbacks {
        on_serialize: Box::new({
            let chunks = Rc::clone(&chunks);
            move |chunk: &str, _initial| chunks.borrow_mut().push(chunk.to_string())
        }),
        on_done: Box::new({
            let done = Rc::clone(&done);
            move || done.set(done.get() + 1)
        }),
        on_error: Box::new({
            let errors = Rc::clone(&errors);
            move |error| errors.borrow_mut().push(error)
        }),
    };
    (
        Collected {
            chunks,
            done,
            errors,
        },
        callbacks,
    )
}

fn eval_all(evaluator: &Evaluator, chunks: &[String]) -> Result<Vec<JsValue>> {
    chunks.iter().map(|chunk| evaluator.eval(chunk)).collect()
}

fn plain_prop(value: &JsValue, key: &str) -> JsValue {
    match &*value.as_object().expect("object").kind() {
        ObjectKind::Plain { props, .. } => props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(JsValue::Undefined),
        other => panic!("expected plain object, got {other:?}"),
    }
}

// --- TESTS ---

#[test]
fn each_promise_produces_a_follow_up_before_done() -> Result<()> {
    let value = JsValue::object(vec![
        ("a", JsValue::promise_resolved(JsValue::number(1.0))),
        ("b", JsValue::promise_resolved(JsValue::number(2.0))),
    ]);
    let (state, callbacks) = collector();
    let handle = cross_serialize_stream(&value, &CrossOptions::default(), callbacks);

    // The initial expression is synchronous.
    assert_eq!(state.chunks.borrow().len(), 1);
    assert_eq!(state.done.get(), 0);

    block_on(handle.join());

    // k promises => at least k+1 serializations, exactly one done.
    assert!(state.chunks.borrow().len() >= 3);
    assert_eq!(state.done.get(), 1);
    assert!(state.errors.borrow().is_empty());
    Ok(())
}

#[test]
fn streamed_promises_settle_on_the_other_side() -> Result<()> {
    let value = JsValue::object(vec![
        ("ok", JsValue::promise_resolved(JsValue::number(42.0))),
        ("bad", JsValue::promise_rejected(JsValue::string("nope"))),
    ]);
    let (state, callbacks) = collector();
    let handle = cross_serialize_stream(&value, &CrossOptions::default(), callbacks);
    block_on(handle.join());

    let evaluator = Evaluator::new();
    let values = eval_all(&evaluator, &state.chunks.borrow())?;
    let root = values[0].clone();

    match &*plain_prop(&root, "ok").as_object().expect("promise").kind() {
        ObjectKind::Promise(PromiseState::Resolved(v)) => {
            assert!(matches!(v, JsValue::Number(n) if *n == 42.0));
        }
        other => panic!("expected resolved promise, got {other:?}"),
    }
    match &*plain_prop(&root, "bad").as_object().expect("promise").kind() {
        ObjectKind::Promise(PromiseState::Rejected(v)) => {
            assert!(matches!(v, JsValue::String(s) if &**s == "nope"));
        }
        other => panic!("expected rejected promise, got {other:?}"),
    }
    Ok(())
}

#[test]
fn streamed_streams_replay_their_events() -> Result<()> {
    let source = futures_lite::stream::iter(vec![
        StreamMessage::Next(JsValue::number(1.0)),
        StreamMessage::Next(JsValue::number(2.0)),
        StreamMessage::Close,
    ]);
    let value = JsValue::stream(Box::pin(source));

    let (state, callbacks) = collector();
    let handle = cross_serialize_stream(&value, &CrossOptions::default(), callbacks);
    block_on(handle.join());

    // Initial constructor + enqueue + enqueue + close.
    assert_eq!(state.chunks.borrow().len(), 4);
    assert_eq!(state.done.get(), 1);

    let evaluator = Evaluator::new();
    let values = eval_all(&evaluator, &state.chunks.borrow())?;
    match &*values[0].as_object().expect("stream").kind() {
        ObjectKind::Stream(contents) => {
            assert_eq!(contents.events.len(), 3);
            assert!(matches!(contents.events[2], StreamMessage::Close));
        }
        other => panic!("expected stream, got {other:?}"),
    }
    Ok(())
}

#[test]
fn nested_async_completions_cascade() -> Result<()> {
    // A promise resolving to an object holding another promise.
    let inner = JsValue::promise_resolved(JsValue::string("deep"));
    let outer = JsValue::promise_resolved(JsValue::object(vec![("inner", inner)]));

    let (state, callbacks) = collector();
    let handle = cross_serialize_stream(&outer, &CrossOptions::default(), callbacks);
    block_on(handle.join());

    // Initial + outer settle + inner settle.
    assert_eq!(state.chunks.borrow().len(), 3);
    assert_eq!(state.done.get(), 1);
    Ok(())
}

#[test]
fn close_suppresses_further_output() -> Result<()> {
    let value = JsValue::object(vec![(
        "p",
        JsValue::promise_resolved(JsValue::number(1.0)),
    )]);
    let (state, callbacks) = collector();
    let handle = cross_serialize_stream(&value, &CrossOptions::default(), callbacks);
    assert_eq!(state.chunks.borrow().len(), 1);

    handle.close();
    handle.close(); // idempotent
    block_on(handle.join());

    assert_eq!(state.chunks.borrow().len(), 1, "follow-up after close");
    assert_eq!(state.done.get(), 0);
    Ok(())
}

#[test]
fn writer_multiplexes_roots_onto_one_channel() -> Result<()> {
    let data: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(0));

    let writer = Vivicode::builder().stream_writer(
        "self",
        &CrossOptions::default(),
        Box::new({
            let data = Rc::clone(&data);
            move |chunk: &str| data.borrow_mut().push(chunk.to_string())
        }),
        Box::new({
            let done = Rc::clone(&done);
            move || done.set(done.get() + 1)
        }),
        Box::new(|error| panic!("unexpected stream error: {error}")),
    );

    writer.write(
        "config",
        &JsValue::object(vec![("debug", JsValue::Bool(true))]),
    )?;
    writer.write(
        "result",
        &JsValue::object(vec![(
            "answer",
            JsValue::promise_resolved(JsValue::number(42.0)),
        )]),
    )?;
    writer.flush();
    block_on(writer.join());

    assert_eq!(done.get(), 1);
    assert!(writer.is_done());

    let chunks = data.borrow();
    assert!(chunks[0].starts_with("self[\"config\"]="));
    assert!(chunks[1].starts_with("self[\"result\"]="));
    // The promise follow-up is a bare expression.
    assert!(chunks.len() >= 3);
    assert!(!chunks[2].starts_with("self["));

    let evaluator = Evaluator::new();
    for chunk in chunks.iter() {
        evaluator.eval(chunk)?;
    }
    let host = evaluator.eval("(self.result)")?;
    let promise = plain_prop(&host, "answer");
    match &*promise.as_object().expect("promise").kind() {
        ObjectKind::Promise(PromiseState::Resolved(v)) => {
            assert!(matches!(v, JsValue::Number(n) if *n == 42.0));
        }
        other => panic!("expected resolved promise, got {other:?}"),
    }
    Ok(())
}

#[test]
fn writer_rejects_duplicate_keys() -> Result<()> {
    let writer = Vivicode::builder().stream_writer(
        "self",
        &CrossOptions::default(),
        Box::new(|_chunk: &str| {}),
        Box::new(|| {}),
        Box::new(|_error| {}),
    );
    writer.write("k", &JsValue::number(1.0))?;
    assert!(writer.write("k", &JsValue::number(2.0)).is_err());
    Ok(())
}

#[test]
fn writer_close_runs_cleanups_and_signals_done() -> Result<()> {
    let done = Rc::new(Cell::new(0));
    let data: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let writer = Vivicode::builder().stream_writer(
        "self",
        &CrossOptions::default(),
        Box::new({
            let data = Rc::clone(&data);
            move |chunk: &str| data.borrow_mut().push(chunk.to_string())
        }),
        Box::new({
            let done = Rc::clone(&done);
            move || done.set(done.get() + 1)
        }),
        Box::new(|_error| {}),
    );

    writer.write(
        "pending",
        &JsValue::object(vec![(
            "p",
            JsValue::promise_resolved(JsValue::number(1.0)),
        )]),
    )?;
    let before = data.borrow().len();

    writer.close();
    writer.close(); // idempotent
    assert_eq!(done.get(), 1);

    block_on(writer.join());
    assert_eq!(data.borrow().len(), before, "output after close");
    Ok(())
}
