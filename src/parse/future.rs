//! The asynchronous parser.
//!
//! Shares the sync parser's dispatch but additionally awaits promises
//! (recording resolve/reject outcomes in the node), drains readable streams,
//! and exposes the byte bodies of `Blob`/`File`/`Request`/`Response` as
//! child `ArrayBuffer` nodes. Suspension points are exactly those; all other
//! work is straight-line.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use futures_lite::StreamExt;

use crate::error::{Result, VivicodeError};
use crate::escape::form_urlencode;
use crate::features::Feature;
use crate::ir::{Node, ObjectFlag, ObjectRecord, PlainRecord, PropKey, RefId, StreamEventNode};
use crate::value::{JsValue, ObjectKind, PromiseState, StreamMessage};

use super::ParserState;

type LocalBox<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// One-shot asynchronous parse pass.
///
/// Interior mutability lets the recursive boxed futures share the state
/// without threading `&mut` through every await point.
pub(crate) struct AsyncParser {
    state: RefCell<ParserState>,
}

impl AsyncParser {
    pub fn new(state: ParserState) -> Self {
        Self {
            state: RefCell::new(state),
        }
    }

    /// Parses a value into a node tree, awaiting where the graph demands it.
    pub fn parse<'a>(&'a self, value: JsValue) -> LocalBox<'a, Result<Node>> {
        Box::pin(self.parse_inner(value))
    }

    async fn parse_inner(&self, value: JsValue) -> Result<Node> {
        if let Some(node) = self.state.borrow_mut().parse_primitive(&value)? {
            return Ok(node);
        }
        let obj = match &value {
            JsValue::Object(o) => o.clone(),
            _ => return Err(VivicodeError::Invariant("non-object after primitive pass".into())),
        };
        let identity = Rc::as_ptr(&obj) as usize;

        if let Some(id) = self.state.borrow().ids.lookup(identity) {
            return Ok(Node::IndexedValue(id));
        }
        if let Some(tag) = self.state.borrow().registry.tag_of(&value) {
            let id = self.state.borrow_mut().ids.assign(identity);
            return Ok(Node::Reference { id, tag });
        }
        let id = self.state.borrow_mut().ids.assign(identity);

        // The async-only kinds mutate the object (settling, draining), so
        // they extract their payload before any await.
        let is_promise = matches!(&*obj.kind(), ObjectKind::Promise(_));
        if is_promise {
            return self.parse_promise(id, &obj).await;
        }
        let is_stream = matches!(&*obj.kind(), ObjectKind::Stream(_));
        if is_stream {
            return self.parse_stream(id, &obj).await;
        }

        let kind = obj.kind();
        match &*kind {
            ObjectKind::Array { items, flag } => {
                let (items, flag) = (items.clone(), *flag);
                drop(kind);
                self.parse_array(id, &items, flag).await
            }
            ObjectKind::Plain {
                proto_null,
                props,
                iterator,
                flag,
            } => {
                let (proto_null, props, iterator, flag) =
                    (*proto_null, props.clone(), iterator.clone(), *flag);
                drop(kind);
                let record = self.parse_record(&props, iterator.as_deref()).await?;
                Ok(if proto_null {
                    Node::NullConstructor { id, record, flag }
                } else {
                    Node::Object { id, record, flag }
                })
            }
            ObjectKind::Date { epoch_ms } => Ok(Node::Date {
                id,
                epoch_ms: *epoch_ms,
            }),
            ObjectKind::RegExp { source, flags } => Ok(Node::RegExp {
                id,
                source: source.clone(),
                flags: flags.clone(),
            }),
            ObjectKind::Error {
                kind: error_kind,
                message,
                props,
            } => {
                let (error_kind, message, props) = (*error_kind, message.clone(), props.clone());
                drop(kind);
                let options = self.parse_error_options(&props, &[]).await?;
                Ok(Node::Error {
                    id,
                    kind: error_kind,
                    message,
                    options,
                })
            }
            ObjectKind::AggregateError {
                message,
                errors,
                props,
            } => {
                let (message, errors, props) = (message.clone(), errors.clone(), props.clone());
                drop(kind);
                let options = self.parse_error_options(&props, &errors).await?;
                if self.state.borrow().features.has(Feature::AGGREGATE_ERROR) {
                    Ok(Node::AggregateError {
                        id,
                        message,
                        options,
                    })
                } else {
                    Ok(Node::Error {
                        id,
                        kind: crate::ir::ErrorKind::Error,
                        message,
                        options,
                    })
                }
            }
            ObjectKind::Boxed(inner) => {
                if matches!(inner, JsValue::Symbol(_)) {
                    return Err(VivicodeError::UnsupportedType("boxed Symbol"));
                }
                let inner = self
                    .state
                    .borrow_mut()
                    .parse_primitive(inner)?
                    .ok_or(VivicodeError::UnsupportedType("boxed object"))?;
                Ok(Node::Boxed {
                    id,
                    inner: Box::new(inner),
                })
            }
            ObjectKind::ArrayBuffer { bytes } => {
                self.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
                Ok(Node::ArrayBuffer {
                    id,
                    bytes: bytes.clone(),
                })
            }
            ObjectKind::TypedArray {
                kind: view_kind,
                buffer,
                byte_offset,
                length,
            } => {
                self.require(Feature::TYPED_ARRAY, view_kind.constructor())?;
                if view_kind.is_big_int() {
                    self.require(Feature::BIGINT_TYPED_ARRAY, view_kind.constructor())?;
                }
                let (view_kind, buffer, byte_offset, length) =
                    (*view_kind, buffer.clone(), *byte_offset, *length);
                drop(kind);
                let buffer = self.parse(buffer).await?;
                Ok(Node::TypedArray {
                    id,
                    kind: view_kind,
                    buffer: Box::new(buffer),
                    byte_offset,
                    length,
                })
            }
            ObjectKind::Map { entries } => {
                self.require(Feature::MAP, "Map")?;
                let entries = entries.clone();
                drop(kind);
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    keys.push(self.parse(k).await?);
                    values.push(self.parse(v).await?);
                }
                Ok(Node::Map { id, keys, values })
            }
            ObjectKind::Set { items } => {
                self.require(Feature::SET, "Set")?;
                let items = items.clone();
                drop(kind);
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(self.parse(item).await?);
                }
                Ok(Node::Set { id, items: parsed })
            }
            ObjectKind::Url { href } => {
                self.require(Feature::WEB_API, "URL")?;
                Ok(Node::Url {
                    id,
                    href: href.clone(),
                })
            }
            ObjectKind::UrlSearchParams { pairs } => {
                self.require(Feature::WEB_API, "URLSearchParams")?;
                Ok(Node::UrlSearchParams {
                    id,
                    init: form_urlencode(pairs),
                })
            }
            ObjectKind::Blob {
                content_type,
                bytes,
            } => {
                self.require(Feature::WEB_API, "Blob")?;
                self.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
                let buffer = self.fresh_buffer(bytes.clone());
                Ok(Node::Blob {
                    id,
                    content_type: content_type.clone(),
                    buffer: Box::new(buffer),
                })
            }
            ObjectKind::File {
                name,
                content_type,
                last_modified,
                bytes,
            } => {
                self.require(Feature::WEB_API, "File")?;
                self.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
                let buffer = self.fresh_buffer(bytes.clone());
                Ok(Node::File {
                    id,
                    name: name.clone(),
                    content_type: content_type.clone(),
                    last_modified: *last_modified,
                    buffer: Box::new(buffer),
                })
            }
            ObjectKind::Headers { entries } => {
                self.require(Feature::WEB_API, "Headers")?;
                Ok(Node::Headers {
                    id,
                    record: PlainRecord {
                        keys: entries.iter().map(|(k, _)| k.clone()).collect(),
                        values: entries
                            .iter()
                            .map(|(_, v)| Node::String(v.clone()))
                            .collect(),
                    },
                })
            }
            ObjectKind::FormData { entries } => {
                self.require(Feature::WEB_API, "FormData")?;
                let entries = entries.clone();
                drop(kind);
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    keys.push(k);
                    values.push(match v {
                        JsValue::String(s) => Node::String(s.to_string()),
                        other @ JsValue::Object(_) => self.parse(other).await?,
                        other => return Err(VivicodeError::UnsupportedType(other.type_name())),
                    });
                }
                Ok(Node::FormData {
                    id,
                    record: PlainRecord { keys, values },
                })
            }
            ObjectKind::Request { url, options } => {
                self.require(Feature::WEB_API, "Request")?;
                let (url, options) = (url.clone(), options.clone());
                drop(kind);
                let options = self.parse(options).await?;
                Ok(Node::Request {
                    id,
                    url,
                    options: Box::new(options),
                })
            }
            ObjectKind::Response { body, options } => {
                self.require(Feature::WEB_API, "Response")?;
                let (body, options) = (body.clone(), options.clone());
                drop(kind);
                let body = match body {
                    Some(b) => Some(Box::new(self.parse(b).await?)),
                    None => None,
                };
                let options = self.parse(options).await?;
                Ok(Node::Response {
                    id,
                    body,
                    options: Box::new(options),
                })
            }
            ObjectKind::Event { name, options } => {
                self.require(Feature::WEB_API, "Event")?;
                let (name, options) = (name.clone(), options.clone());
                drop(kind);
                let options = self.parse(options).await?;
                Ok(Node::Event {
                    id,
                    name,
                    options: Box::new(options),
                })
            }
            ObjectKind::CustomEvent { name, options } => {
                self.require(Feature::WEB_API, "CustomEvent")?;
                let (name, options) = (name.clone(), options.clone());
                drop(kind);
                let options = self.parse(options).await?;
                Ok(Node::CustomEvent {
                    id,
                    name,
                    options: Box::new(options),
                })
            }
            ObjectKind::DomException { message, name } => {
                self.require(Feature::WEB_API, "DOMException")?;
                Ok(Node::DomException {
                    id,
                    message: message.clone(),
                    name: name.clone(),
                })
            }
            ObjectKind::Promise(_) | ObjectKind::Stream(_) => {
                Err(VivicodeError::Invariant("async kind escaped the early dispatch".into()))
            }
            ObjectKind::Foreign(_) => {
                let type_name = kind.type_name();
                drop(kind);
                self.parse_foreign(id, &value, type_name)
            }
        }
    }

    fn require(&self, needed: Feature, name: &'static str) -> Result<()> {
        self.state.borrow().require(needed, name)
    }

    fn parse_foreign(&self, id: RefId, value: &JsValue, type_name: &'static str) -> Result<Node> {
        let state = self.state.borrow();
        if let Some(plugin) = state.plugins.find_for_value(value) {
            let tag = plugin.tag().to_string();
            let payload = plugin.parse(value)?;
            return Ok(Node::Plugin { id, tag, payload });
        }
        Err(VivicodeError::UnsupportedType(type_name))
    }

    /// Awaits the promise (when still pending), records the settled state
    /// back on the value so aliases parsed later agree, and parses the
    /// payload. A thrown value becomes the reject payload, not an error.
    async fn parse_promise(&self, id: RefId, obj: &Rc<crate::value::JsObject>) -> Result<Node> {
        self.require(Feature::PROMISE, "Promise")?;

        enum Step {
            Settled(bool, JsValue),
            Await(crate::value::PromiseFuture),
        }

        let step = {
            let mut kind = obj.kind_mut();
            match &mut *kind {
                ObjectKind::Promise(state) => match state {
                    PromiseState::Resolved(v) => Step::Settled(true, v.clone()),
                    PromiseState::Rejected(v) => Step::Settled(false, v.clone()),
                    PromiseState::Pending(slot) => match slot.take() {
                        Some(fut) => Step::Await(fut),
                        None => {
                            return Err(VivicodeError::Invariant(
                                "pending promise has no future to await".into(),
                            ))
                        }
                    },
                },
                _ => return Err(VivicodeError::Invariant("promise kind changed mid-parse".into())),
            }
        };

        let (resolved, payload) = match step {
            Step::Settled(resolved, payload) => (resolved, payload),
            Step::Await(fut) => {
                let outcome = fut.await;
                let pair = match outcome {
                    Ok(v) => (true, v),
                    Err(v) => (false, v),
                };
                if let ObjectKind::Promise(state) = &mut *obj.kind_mut() {
                    *state = if pair.0 {
                        PromiseState::Resolved(pair.1.clone())
                    } else {
                        PromiseState::Rejected(pair.1.clone())
                    };
                }
                pair
            }
        };

        let value = self.parse(payload).await?;
        Ok(Node::Promise {
            id,
            resolved,
            value: Box::new(value),
        })
    }

    /// Drains the stream source (if any), records the events on the value,
    /// and emits a fully-drained stream node. A source that ends without an
    /// explicit terminal message counts as closed.
    async fn parse_stream(&self, id: RefId, obj: &Rc<crate::value::JsObject>) -> Result<Node> {
        self.require(Feature::WEB_API, "ReadableStream")?;

        let source = match &mut *obj.kind_mut() {
            ObjectKind::Stream(contents) => contents.source.take(),
            _ => return Err(VivicodeError::Invariant("stream kind changed mid-parse".into())),
        };

        if let Some(mut src) = source {
            let mut drained = Vec::new();
            while let Some(message) = src.next().await {
                let terminal =
                    matches!(message, StreamMessage::Error(_) | StreamMessage::Close);
                drained.push(message);
                if terminal {
                    break;
                }
            }
            if let ObjectKind::Stream(contents) = &mut *obj.kind_mut() {
                contents.events.extend(drained);
            }
        }

        let events = match &*obj.kind() {
            ObjectKind::Stream(contents) => contents.events.clone(),
            _ => Vec::new(),
        };

        let mut parsed = Vec::with_capacity(events.len() + 1);
        let mut terminated = false;
        for message in events {
            match message {
                StreamMessage::Next(chunk) => {
                    parsed.push(StreamEventNode::Enqueue(self.parse(chunk).await?));
                }
                StreamMessage::Error(payload) => {
                    parsed.push(StreamEventNode::Error(self.parse(payload).await?));
                    terminated = true;
                    break;
                }
                StreamMessage::Close => {
                    parsed.push(StreamEventNode::Close);
                    terminated = true;
                    break;
                }
            }
        }
        if !terminated {
            parsed.push(StreamEventNode::Close);
        }

        Ok(Node::ReadableStream { id, events: parsed })
    }

    async fn parse_array(
        &self,
        id: RefId,
        items: &[Option<JsValue>],
        flag: ObjectFlag,
    ) -> Result<Node> {
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(match item {
                Some(v) => Some(self.parse(v.clone()).await?),
                None => None,
            });
        }
        Ok(Node::Array {
            id,
            length: items.len() as u32,
            items: parsed,
            flag,
        })
    }

    async fn parse_record(
        &self,
        props: &[(String, JsValue)],
        iterator: Option<&[JsValue]>,
    ) -> Result<ObjectRecord> {
        let mut keys = Vec::with_capacity(props.len());
        let mut values = Vec::with_capacity(props.len());
        let mut deferred: Vec<(&String, &JsValue)> = Vec::new();

        for (key, value) in props {
            if value.is_iterable() {
                deferred.push((key, value));
            } else {
                keys.push(PropKey::String(key.clone()));
                values.push(self.parse(value.clone()).await?);
            }
        }
        for (key, value) in deferred {
            keys.push(PropKey::String(key.clone()));
            values.push(self.parse(value.clone()).await?);
        }

        if let Some(items) = iterator {
            self.require(Feature::SYMBOL, "Symbol")?;
            let array = self.parse_fresh_array(items).await?;
            keys.push(PropKey::SymbolIterator);
            values.push(array);
        }

        Ok(ObjectRecord { keys, values })
    }

    async fn parse_fresh_array(&self, items: &[JsValue]) -> Result<Node> {
        let id = self.state.borrow_mut().ids.fresh();
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(Some(self.parse(item.clone()).await?));
        }
        Ok(Node::Array {
            id,
            length: items.len() as u32,
            items: parsed,
            flag: ObjectFlag::None,
        })
    }

    async fn parse_error_options(
        &self,
        props: &[(String, JsValue)],
        errors: &[JsValue],
    ) -> Result<Option<ObjectRecord>> {
        let mut record = ObjectRecord::default();
        if !errors.is_empty() {
            let array = self.parse_fresh_array(errors).await?;
            record.keys.push(PropKey::String("errors".into()));
            record.values.push(array);
        }
        let features = self.state.borrow().features;
        let kept: Vec<(String, JsValue)> = super::error_option_props(features, props)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for (key, value) in kept {
            record.keys.push(PropKey::String(key));
            record.values.push(self.parse(value).await?);
        }
        Ok(if record.is_empty() {
            None
        } else {
            Some(record)
        })
    }

    /// A fresh `ArrayBuffer` node for a drained body.
    fn fresh_buffer(&self, bytes: Vec<u8>) -> Node {
        Node::ArrayBuffer {
            id: self.state.borrow_mut().ids.fresh(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::IdSpace;
    use crate::plugin::PluginRegistry;
    use crate::registry::ReferenceRegistry;
    use futures_lite::future::block_on;

    fn parser() -> AsyncParser {
        AsyncParser::new(ParserState::new(
            Feature::all(),
            PluginRegistry::new(),
            Rc::new(ReferenceRegistry::new()),
            IdSpace::local(),
        ))
    }

    #[test]
    fn awaits_pending_promises() {
        let p = parser();
        let promise = JsValue::promise_pending(async { Ok(JsValue::number(42.0)) });
        let node = block_on(p.parse(promise)).unwrap();
        match node {
            Node::Promise {
                resolved, value, ..
            } => {
                assert!(resolved);
                assert_eq!(*value, Node::Number(42.0));
            }
            other => panic!("expected promise node, got {other:?}"),
        }
    }

    #[test]
    fn rejections_become_payloads_not_errors() {
        let p = parser();
        let promise = JsValue::promise_pending(async { Err(JsValue::string("nope")) });
        let node = block_on(p.parse(promise)).unwrap();
        match node {
            Node::Promise {
                resolved, value, ..
            } => {
                assert!(!resolved);
                assert_eq!(*value, Node::String("nope".into()));
            }
            other => panic!("expected promise node, got {other:?}"),
        }
    }

    #[test]
    fn drains_stream_sources() {
        let p = parser();
        let source = futures_lite::stream::iter(vec![
            StreamMessage::Next(JsValue::number(1.0)),
            StreamMessage::Next(JsValue::number(2.0)),
            StreamMessage::Close,
        ]);
        let stream = JsValue::stream(Box::pin(source));
        let node = block_on(p.parse(stream)).unwrap();
        match node {
            Node::ReadableStream { events, .. } => {
                assert_eq!(events.len(), 3);
                assert!(matches!(events[2], StreamEventNode::Close));
            }
            other => panic!("expected stream node, got {other:?}"),
        }
    }
}
