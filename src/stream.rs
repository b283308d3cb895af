//! The streaming driver.
//!
//! Event-driven control flow: each root spawns a streaming parse whose IR is
//! serialized and emitted immediately; every asynchronous completion
//! (promise settlement, stream chunk) then produces a follow-up expression
//! bound to the shared reference table. The driver is purely reactive —
//! completed tasks hand their payloads back to the parser, which may queue
//! further tasks, and a pending counter detects quiescence.
//!
//! Scheduling is single-threaded cooperative: `join()` round-robins the
//! in-flight completions with `poll_once`/`yield_now`; nothing runs unless
//! the caller drives it.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use futures_lite::future::{poll_once, yield_now};
use futures_lite::StreamExt;

use crate::error::{Result, VivicodeError};
use crate::escape::quote;
use crate::features::Feature;
use crate::ir::{Node, RefId};
use crate::parse::stream::PendingTask;
use crate::parse::sync::SyncParser;
use crate::parse::{IdSpace, ParserState, SharedIds};
use crate::plugin::PluginRegistry;
use crate::registry::ReferenceRegistry;
use crate::serializer::cross;
use crate::value::{JsValue, StreamMessage};

type LocalFut = Pin<Box<dyn Future<Output = ()>>>;

/// Chunk sink: `(expression, is_initial_chunk)`.
pub type SerializeFn = Box<dyn FnMut(&str, bool)>;
/// Completion sink.
pub type DoneFn = Box<dyn FnMut()>;
/// Error sink.
pub type ErrorFn = Box<dyn FnMut(VivicodeError)>;

/// Callbacks of one streaming serialization.
pub struct StreamCallbacks {
    /// Receives every emitted expression.
    pub on_serialize: SerializeFn,
    /// Fires exactly once, when no completions remain.
    pub on_done: DoneFn,
    /// Receives parse/emission errors; output stops afterwards.
    pub on_error: ErrorFn,
}

/// Serialization configuration shared by the cross-mode entry points.
pub(crate) struct CrossConfig {
    pub features: Feature,
    pub plugins: PluginRegistry,
    pub registry: Rc<ReferenceRegistry>,
    pub scope: Option<String>,
    pub ids: Rc<SharedIds>,
}

struct StreamInner {
    alive: Cell<bool>,
    done: Cell<bool>,
    pending: Cell<usize>,
    tasks: RefCell<Vec<PendingTask>>,
    callbacks: RefCell<StreamCallbacks>,
    features: Feature,
    plugins: PluginRegistry,
    registry: Rc<ReferenceRegistry>,
    scope: Option<String>,
    ids: Rc<SharedIds>,
}

impl StreamInner {
    fn parser(&self, pending: Rc<RefCell<Vec<PendingTask>>>) -> SyncParser {
        SyncParser::new_streaming(
            ParserState::new(
                self.features,
                self.plugins.clone(),
                Rc::clone(&self.registry),
                IdSpace::Shared(Rc::clone(&self.ids)),
            ),
            pending,
        )
    }

    fn emit(&self, node: &Node, initial: bool) {
        if !self.alive.get() {
            return;
        }
        match cross::serialize_tree(node, self.features, self.plugins.clone(), self.scope.clone())
        {
            Ok(chunk) => {
                (self.callbacks.borrow_mut().on_serialize)(&chunk, initial);
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&self, error: VivicodeError) {
        if !self.alive.get() {
            return;
        }
        (self.callbacks.borrow_mut().on_error)(error);
        self.alive.set(false);
    }

    fn settle(&self) {
        self.pending.set(self.pending.get().saturating_sub(1));
        self.check_done();
    }

    fn check_done(&self) {
        if self.alive.get() && !self.done.get() && self.pending.get() == 0 {
            self.done.set(true);
            (self.callbacks.borrow_mut().on_done)();
        }
    }

    /// Parses a follow-up payload; tasks discovered on the way extend the
    /// pending counter.
    fn parse_payload(&self, value: &JsValue) -> Result<Node> {
        let queued: Rc<RefCell<Vec<PendingTask>>> = Rc::new(RefCell::new(Vec::new()));
        let mut parser = self.parser(Rc::clone(&queued));
        let node = parser.parse(value)?;
        let mut queued = queued.borrow_mut();
        self.pending.set(self.pending.get() + queued.len());
        self.tasks.borrow_mut().append(&mut queued);
        Ok(node)
    }

    fn complete_promise(
        self: &Rc<Self>,
        id: RefId,
        outcome: std::result::Result<JsValue, JsValue>,
    ) {
        if !self.alive.get() {
            return;
        }
        let (resolved, payload) = match outcome {
            Ok(v) => (true, v),
            Err(v) => (false, v),
        };
        match self.parse_payload(&payload) {
            Ok(value) => {
                let node = if resolved {
                    Node::PromiseResolve {
                        id,
                        value: Box::new(value),
                    }
                } else {
                    Node::PromiseReject {
                        id,
                        value: Box::new(value),
                    }
                };
                self.emit(&node, false);
            }
            Err(error) => self.fail(error),
        }
    }

    /// Emits one stream follow-up; returns true when the message was
    /// terminal.
    fn complete_stream_event(self: &Rc<Self>, id: RefId, message: StreamMessage) -> bool {
        if !self.alive.get() {
            return true;
        }
        match message {
            StreamMessage::Next(chunk) => match self.parse_payload(&chunk) {
                Ok(value) => {
                    self.emit(
                        &Node::ReadableStreamEnqueue {
                            id,
                            value: Box::new(value),
                        },
                        false,
                    );
                    false
                }
                Err(error) => {
                    self.fail(error);
                    true
                }
            },
            StreamMessage::Error(payload) => match self.parse_payload(&payload) {
                Ok(value) => {
                    self.emit(
                        &Node::ReadableStreamError {
                            id,
                            value: Box::new(value),
                        },
                        false,
                    );
                    true
                }
                Err(error) => {
                    self.fail(error);
                    true
                }
            },
            StreamMessage::Close => {
                self.emit(&Node::ReadableStreamClose { id }, false);
                true
            }
        }
    }
}

fn spawn_task(inner: &Rc<StreamInner>, task: PendingTask) -> LocalFut {
    let inner = Rc::clone(inner);
    match task {
        PendingTask::Promise { id, future } => Box::pin(async move {
            let outcome = future.await;
            inner.complete_promise(id, outcome);
            inner.settle();
        }),
        PendingTask::Stream {
            id,
            source,
            recorded,
        } => Box::pin(async move {
            let mut terminated = false;
            for message in recorded {
                if inner.complete_stream_event(id, message) {
                    terminated = true;
                    break;
                }
            }
            if let Some(mut source) = source {
                while !terminated {
                    match source.next().await {
                        Some(message) => {
                            terminated = inner.complete_stream_event(id, message);
                        }
                        None => {
                            // Source exhausted without a terminal message.
                            inner.complete_stream_event(id, StreamMessage::Close);
                            terminated = true;
                        }
                    }
                }
            }
            inner.settle();
        }),
    }
}

/// Handle of one streaming cross-serialization; also the disposer.
pub struct StreamHandle {
    inner: Rc<StreamInner>,
}

impl StreamHandle {
    /// Drives the pending completions to quiescence. Callbacks fire from
    /// inside this future; without driving it, only the initial expression
    /// is ever produced.
    pub async fn join(&self) {
        let mut running: Vec<LocalFut> = Vec::new();
        loop {
            for task in self.inner.tasks.borrow_mut().drain(..) {
                running.push(spawn_task(&self.inner, task));
            }
            if running.is_empty() || !self.inner.alive.get() {
                break;
            }
            let mut still = Vec::new();
            let mut progressed = false;
            for mut fut in running {
                match poll_once(&mut fut).await {
                    Some(()) => progressed = true,
                    None => still.push(fut),
                }
            }
            running = still;
            if !progressed {
                yield_now().await;
            }
        }
    }

    /// True once `on_done` fired.
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }

    /// Aborts: suppresses all further callbacks and drops unsettled
    /// completions. Idempotent and synchronous; the underlying awaitables
    /// are not cancelled, their settlements are simply ignored.
    pub fn close(&self) {
        self.inner.alive.set(false);
    }
}

/// Starts a streaming cross-serialization of `value`.
///
/// The initial expression is emitted synchronously before this returns;
/// follow-ups fire while [`StreamHandle::join`] is being driven.
pub(crate) fn cross_serialize_stream(
    value: &JsValue,
    config: CrossConfig,
    callbacks: StreamCallbacks,
) -> StreamHandle {
    let inner = Rc::new(StreamInner {
        alive: Cell::new(true),
        done: Cell::new(false),
        pending: Cell::new(0),
        tasks: RefCell::new(Vec::new()),
        callbacks: RefCell::new(callbacks),
        features: config.features,
        plugins: config.plugins,
        registry: config.registry,
        scope: config.scope,
        ids: config.ids,
    });

    let queued: Rc<RefCell<Vec<PendingTask>>> = Rc::new(RefCell::new(Vec::new()));
    let mut parser = inner.parser(Rc::clone(&queued));
    match parser.parse(value) {
        Ok(node) => {
            {
                let mut queued = queued.borrow_mut();
                inner.pending.set(queued.len());
                inner.tasks.borrow_mut().append(&mut queued);
            }
            inner.emit(&node, true);
            inner.check_done();
        }
        Err(error) => inner.fail(error),
    }

    StreamHandle {
        inner,
    }
}

// --- MULTIPLEXING WRITER ---

struct WriterInner {
    alive: Cell<bool>,
    flushed: Cell<bool>,
    done: Cell<bool>,
    pending: Cell<usize>,
    keys: RefCell<HashSet<String>>,
    cleanups: RefCell<Vec<StreamHandle>>,
    on_data: RefCell<Box<dyn FnMut(&str)>>,
    on_done: RefCell<Box<dyn FnMut()>>,
    on_error: RefCell<ErrorFn>,
}

impl WriterInner {
    fn check_done(&self) {
        if self.alive.get() && !self.done.get() && self.flushed.get() && self.pending.get() == 0 {
            self.done.set(true);
            (self.on_done.borrow_mut())();
        }
    }
}

/// Multiplexes many root values onto one output channel.
///
/// Each root is bound to a caller-supplied key: the first chunk of a root is
/// emitted as `<global>["<key>"]=<chunk>`, follow-ups are raw expressions
/// against the shared table.
pub struct StreamWriter {
    inner: Rc<WriterInner>,
    global_identifier: String,
    features: Feature,
    plugins: PluginRegistry,
    registry: Rc<ReferenceRegistry>,
    scope: Option<String>,
    ids: Rc<SharedIds>,
}

impl StreamWriter {
    /// Creates a writer emitting bindings on `global_identifier`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        global_identifier: String,
        features: Feature,
        plugins: PluginRegistry,
        registry: Rc<ReferenceRegistry>,
        scope: Option<String>,
        ids: Rc<SharedIds>,
        on_data: Box<dyn FnMut(&str)>,
        on_done: Box<dyn FnMut()>,
        on_error: ErrorFn,
    ) -> Self {
        Self {
            inner: Rc::new(WriterInner {
                alive: Cell::new(true),
                flushed: Cell::new(false),
                done: Cell::new(false),
                pending: Cell::new(0),
                keys: RefCell::new(HashSet::new()),
                cleanups: RefCell::new(Vec::new()),
                on_data: RefCell::new(on_data),
                on_done: RefCell::new(on_done),
                on_error: RefCell::new(on_error),
            }),
            global_identifier,
            features,
            plugins,
            registry,
            scope,
            ids,
        }
    }

    /// Starts serializing one root bound to `key`.
    pub fn write(&self, key: &str, value: &JsValue) -> Result<()> {
        if !self.inner.alive.get() {
            return Err(VivicodeError::Invariant("writer is closed".into()));
        }
        if !self.inner.keys.borrow_mut().insert(key.to_string()) {
            return Err(VivicodeError::TagCollision(key.to_string()));
        }
        self.inner.pending.set(self.inner.pending.get() + 1);

        let binding = format!("{}[{}]=", self.global_identifier, quote(key));
        let writer = Rc::clone(&self.inner);
        let writer_done = Rc::clone(&self.inner);
        let writer_err = Rc::clone(&self.inner);
        let handle = cross_serialize_stream(
            value,
            CrossConfig {
                features: self.features,
                plugins: self.plugins.clone(),
                registry: Rc::clone(&self.registry),
                scope: self.scope.clone(),
                ids: Rc::clone(&self.ids),
            },
            StreamCallbacks {
                on_serialize: Box::new(move |chunk, initial| {
                    if !writer.alive.get() {
                        return;
                    }
                    if initial {
                        let bound = format!("{binding}{chunk}");
                        (writer.on_data.borrow_mut())(&bound);
                    } else {
                        (writer.on_data.borrow_mut())(chunk);
                    }
                }),
                on_done: Box::new(move || {
                    writer_done
                        .pending
                        .set(writer_done.pending.get().saturating_sub(1));
                    writer_done.check_done();
                }),
                on_error: Box::new(move |error| {
                    if writer_err.alive.get() {
                        (writer_err.on_error.borrow_mut())(error);
                    }
                }),
            },
        );
        self.inner.cleanups.borrow_mut().push(handle);
        Ok(())
    }

    /// Declares that no more roots will be added; `on_done` fires once the
    /// pending counter reaches zero.
    pub fn flush(&self) {
        self.inner.flushed.set(true);
        self.inner.check_done();
    }

    /// Drives every root's completions.
    pub async fn join(&self) {
        loop {
            let handles: Vec<StreamHandle> =
                self.inner.cleanups.borrow_mut().drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in &handles {
                handle.join().await;
            }
            self.inner.cleanups.borrow_mut().extend(handles);
            // write() may have queued more roots while joining; go around
            // again until every handle is drained.
            let drained = self
                .inner
                .cleanups
                .borrow()
                .iter()
                .all(|h| h.inner.tasks.borrow().is_empty());
            if drained {
                break;
            }
        }
        self.inner.check_done();
    }

    /// Aborts: runs all cleanups, fires `on_done` if it has not fired, and
    /// suppresses further callbacks. Idempotent.
    pub fn close(&self) {
        if !self.inner.alive.get() {
            return;
        }
        for handle in self.inner.cleanups.borrow().iter() {
            handle.close();
        }
        if !self.inner.done.get() {
            self.inner.done.set(true);
            (self.inner.on_done.borrow_mut())();
        }
        self.inner.alive.set(false);
    }

    /// True once `on_done` fired.
    pub fn is_done(&self) -> bool {
        self.inner.done.get()
    }
}
