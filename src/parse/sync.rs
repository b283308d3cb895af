//! The synchronous parser.
//!
//! Never suspends. In strict mode (the `serialize`/`to_json` entry points)
//! promise-bearing values (promises, streams) and the body-bearing web
//! objects (`Blob`, `File`, `Request`, `Response`) are rejected with
//! `UnsupportedType`. In streaming mode (cross-serialize streams) promises
//! and streams become constructor nodes plus pending completion tasks, and
//! the body-bearing objects parse inline since their bytes are already in
//! memory.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Result, VivicodeError};
use crate::escape::form_urlencode;
use crate::features::Feature;
use crate::ir::{Node, ObjectFlag, ObjectRecord, PlainRecord, PropKey, RefId};
use crate::value::{JsValue, ObjectKind, PromiseState};

use super::stream::PendingTask;
use super::ParserState;

/// Whether async completions are rejected or queued.
pub(crate) enum ParseMode {
    /// Reject promise-bearing values.
    Strict,
    /// Queue promise/stream completions for the streaming driver.
    Streaming(Rc<RefCell<Vec<PendingTask>>>),
}

/// One-shot synchronous parse pass.
pub(crate) struct SyncParser {
    pub state: ParserState,
    mode: ParseMode,
}

impl SyncParser {
    /// A strict parser for the self-contained entry points.
    pub fn new(state: ParserState) -> Self {
        Self {
            state,
            mode: ParseMode::Strict,
        }
    }

    /// A streaming parser pushing completions onto `pending`.
    pub fn new_streaming(state: ParserState, pending: Rc<RefCell<Vec<PendingTask>>>) -> Self {
        Self {
            state,
            mode: ParseMode::Streaming(pending),
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(self.mode, ParseMode::Streaming(_))
    }

    /// Parses a value into a node tree.
    pub fn parse(&mut self, value: &JsValue) -> Result<Node> {
        if let Some(node) = self.state.parse_primitive(value)? {
            return Ok(node);
        }
        let obj = match value {
            JsValue::Object(o) => o.clone(),
            _ => return Err(VivicodeError::Invariant("non-object after primitive pass".into())),
        };
        let identity = Rc::as_ptr(&obj) as usize;

        // Repeated occurrences collapse to the id assigned at first sight.
        if let Some(id) = self.state.ids.lookup(identity) {
            return Ok(Node::IndexedValue(id));
        }

        // Registered external references take priority over every other case.
        if let Some(tag) = self.state.registry.tag_of(value) {
            let id = self.state.ids.assign(identity);
            return Ok(Node::Reference { id, tag });
        }

        let id = self.state.ids.assign(identity);

        // Streaming mode intercepts the async kinds before the main
        // dispatch: they need `kind_mut` to take their futures out.
        if self.is_streaming() {
            let is_promise = matches!(&*obj.kind(), ObjectKind::Promise(_));
            if is_promise {
                return self.parse_promise_streaming(id, &obj);
            }
            let is_stream = matches!(&*obj.kind(), ObjectKind::Stream(_));
            if is_stream {
                return self.parse_stream_streaming(id, &obj);
            }
        }

        let kind = obj.kind();
        match &*kind {
            ObjectKind::Array { items, flag } => self.parse_array(id, items, *flag),
            ObjectKind::Plain {
                proto_null,
                props,
                iterator,
                flag,
            } => {
                let record = self.parse_record(props, iterator.as_deref())?;
                Ok(if *proto_null {
                    Node::NullConstructor {
                        id,
                        record,
                        flag: *flag,
                    }
                } else {
                    Node::Object {
                        id,
                        record,
                        flag: *flag,
                    }
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
                let options = self.parse_error_options(props, &[])?;
                Ok(Node::Error {
                    id,
                    kind: *error_kind,
                    message: message.clone(),
                    options,
                })
            }
            ObjectKind::AggregateError {
                message,
                errors,
                props,
            } => {
                let options = self.parse_error_options(props, errors)?;
                if self.state.features.has(Feature::AGGREGATE_ERROR) {
                    Ok(Node::AggregateError {
                        id,
                        message: message.clone(),
                        options,
                    })
                } else {
                    // Downgrade for runtimes without the constructor; the
                    // aggregated errors ride along in the options record.
                    Ok(Node::Error {
                        id,
                        kind: crate::ir::ErrorKind::Error,
                        message: message.clone(),
                        options,
                    })
                }
            }
            ObjectKind::Boxed(inner) => {
                if matches!(inner, JsValue::Symbol(_)) {
                    // Symbols have no literal form; boxing one is not
                    // round-trippable.
                    return Err(VivicodeError::UnsupportedType("boxed Symbol"));
                }
                let inner = self
                    .state
                    .parse_primitive(inner)?
                    .ok_or(VivicodeError::UnsupportedType("boxed object"))?;
                Ok(Node::Boxed {
                    id,
                    inner: Box::new(inner),
                })
            }
            ObjectKind::ArrayBuffer { bytes } => {
                self.state.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
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
                self.state
                    .require(Feature::TYPED_ARRAY, view_kind.constructor())?;
                if view_kind.is_big_int() {
                    self.state
                        .require(Feature::BIGINT_TYPED_ARRAY, view_kind.constructor())?;
                }
                let buffer = self.parse(buffer)?;
                Ok(Node::TypedArray {
                    id,
                    kind: *view_kind,
                    buffer: Box::new(buffer),
                    byte_offset: *byte_offset,
                    length: *length,
                })
            }
            ObjectKind::Map { entries } => {
                self.state.require(Feature::MAP, "Map")?;
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    keys.push(self.parse(k)?);
                    values.push(self.parse(v)?);
                }
                Ok(Node::Map { id, keys, values })
            }
            ObjectKind::Set { items } => {
                self.state.require(Feature::SET, "Set")?;
                let items = items
                    .iter()
                    .map(|item| self.parse(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Set { id, items })
            }
            ObjectKind::Url { href } => {
                self.state.require(Feature::WEB_API, "URL")?;
                Ok(Node::Url {
                    id,
                    href: href.clone(),
                })
            }
            ObjectKind::UrlSearchParams { pairs } => {
                self.state.require(Feature::WEB_API, "URLSearchParams")?;
                Ok(Node::UrlSearchParams {
                    id,
                    init: form_urlencode(pairs),
                })
            }
            ObjectKind::Headers { entries } => {
                self.state.require(Feature::WEB_API, "Headers")?;
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
                self.state.require(Feature::WEB_API, "FormData")?;
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    keys.push(k.clone());
                    values.push(match v {
                        JsValue::String(s) => Node::String(s.to_string()),
                        other @ JsValue::Object(_) if self.is_streaming() => self.parse(other)?,
                        // Blob/File entries carry bodies; async only.
                        other => return Err(VivicodeError::UnsupportedType(other.type_name())),
                    });
                }
                Ok(Node::FormData {
                    id,
                    record: PlainRecord { keys, values },
                })
            }
            ObjectKind::Event { name, options } => {
                self.state.require(Feature::WEB_API, "Event")?;
                let options = self.parse(options)?;
                Ok(Node::Event {
                    id,
                    name: name.clone(),
                    options: Box::new(options),
                })
            }
            ObjectKind::CustomEvent { name, options } => {
                self.state.require(Feature::WEB_API, "CustomEvent")?;
                let options = self.parse(options)?;
                Ok(Node::CustomEvent {
                    id,
                    name: name.clone(),
                    options: Box::new(options),
                })
            }
            ObjectKind::DomException { message, name } => {
                self.state.require(Feature::WEB_API, "DOMException")?;
                Ok(Node::DomException {
                    id,
                    message: message.clone(),
                    name: name.clone(),
                })
            }
            ObjectKind::Blob {
                content_type,
                bytes,
            } if self.is_streaming() => {
                self.state.require(Feature::WEB_API, "Blob")?;
                self.state.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
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
            } if self.is_streaming() => {
                self.state.require(Feature::WEB_API, "File")?;
                self.state.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
                let buffer = self.fresh_buffer(bytes.clone());
                Ok(Node::File {
                    id,
                    name: name.clone(),
                    content_type: content_type.clone(),
                    last_modified: *last_modified,
                    buffer: Box::new(buffer),
                })
            }
            ObjectKind::Request { url, options } if self.is_streaming() => {
                self.state.require(Feature::WEB_API, "Request")?;
                let options = self.parse(options)?;
                Ok(Node::Request {
                    id,
                    url: url.clone(),
                    options: Box::new(options),
                })
            }
            ObjectKind::Response { body, options } if self.is_streaming() => {
                self.state.require(Feature::WEB_API, "Response")?;
                let body = match body {
                    Some(b) => Some(Box::new(self.parse(b)?)),
                    None => None,
                };
                let options = self.parse(options)?;
                Ok(Node::Response {
                    id,
                    body,
                    options: Box::new(options),
                })
            }
            // Strict mode: the sync entry point is documented to fail on
            // promise-bearing input.
            ObjectKind::Promise(_)
            | ObjectKind::Stream(_)
            | ObjectKind::Blob { .. }
            | ObjectKind::File { .. }
            | ObjectKind::Request { .. }
            | ObjectKind::Response { .. } => {
                Err(VivicodeError::UnsupportedType(kind.type_name()))
            }
            ObjectKind::Foreign(_) => self.parse_foreign(id, value, kind.type_name()),
        }
    }

    fn push_pending(&self, task: PendingTask) {
        if let ParseMode::Streaming(pending) = &self.mode {
            pending.borrow_mut().push(task);
        }
    }

    /// Streaming: promises become constructor nodes; the settle outcome (or
    /// the already-settled value) is queued for the driver.
    fn parse_promise_streaming(
        &mut self,
        id: RefId,
        obj: &Rc<crate::value::JsObject>,
    ) -> Result<Node> {
        self.state.require(Feature::PROMISE, "Promise")?;
        let task = {
            let mut kind = obj.kind_mut();
            match &mut *kind {
                ObjectKind::Promise(state) => match state {
                    PromiseState::Resolved(v) => {
                        let fut: crate::value::PromiseFuture =
                            Box::pin(std::future::ready(Ok(v.clone())));
                        Some(fut)
                    }
                    PromiseState::Rejected(v) => {
                        let fut: crate::value::PromiseFuture =
                            Box::pin(std::future::ready(Err(v.clone())));
                        Some(fut)
                    }
                    // No future to observe: the promise stays pending and
                    // never produces a follow-up.
                    PromiseState::Pending(slot) => slot.take(),
                },
                _ => None,
            }
        };
        if let Some(future) = task {
            self.push_pending(PendingTask::Promise { id, future });
        }
        Ok(Node::PromiseConstructor { id })
    }

    /// Streaming: streams become constructor nodes; the source (or recorded
    /// replay) is queued for the driver.
    fn parse_stream_streaming(
        &mut self,
        id: RefId,
        obj: &Rc<crate::value::JsObject>,
    ) -> Result<Node> {
        self.state.require(Feature::WEB_API, "ReadableStream")?;
        let (source, recorded) = {
            let mut kind = obj.kind_mut();
            match &mut *kind {
                ObjectKind::Stream(contents) => {
                    (contents.source.take(), contents.events.clone())
                }
                _ => (None, Vec::new()),
            }
        };
        self.push_pending(PendingTask::Stream {
            id,
            source,
            recorded,
        });
        Ok(Node::ReadableStreamConstructor { id })
    }

    fn parse_foreign(&mut self, id: RefId, value: &JsValue, type_name: &'static str) -> Result<Node> {
        if let Some(plugin) = self.state.plugins.find_for_value(value) {
            let tag = plugin.tag().to_string();
            let payload = plugin.parse(value)?;
            return Ok(Node::Plugin { id, tag, payload });
        }
        Err(VivicodeError::UnsupportedType(type_name))
    }

    fn parse_array(
        &mut self,
        id: RefId,
        items: &[Option<JsValue>],
        flag: ObjectFlag,
    ) -> Result<Node> {
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(match item {
                Some(v) => Some(self.parse(v)?),
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

    /// Two-pass property extraction: iterable-valued pairs are deferred so a
    /// lazy iterator is never consumed before an unrelated eager value it
    /// structurally shares.
    fn parse_record(
        &mut self,
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
                values.push(self.parse(value)?);
            }
        }
        for (key, value) in deferred {
            keys.push(PropKey::String(key.clone()));
            values.push(self.parse(value)?);
        }

        if let Some(items) = iterator {
            self.state.require(Feature::SYMBOL, "Symbol")?;
            let array = self.parse_fresh_array(items)?;
            keys.push(PropKey::SymbolIterator);
            values.push(array);
        }

        Ok(ObjectRecord { keys, values })
    }

    /// A freshly-materialized array node for drained iterator items.
    fn parse_fresh_array(&mut self, items: &[JsValue]) -> Result<Node> {
        let id = self.state.ids.fresh();
        let parsed = items
            .iter()
            .map(|item| self.parse(item).map(Some))
            .collect::<Result<Vec<_>>>()?;
        Ok(Node::Array {
            id,
            length: items.len() as u32,
            items: parsed,
            flag: ObjectFlag::None,
        })
    }

    /// A fresh `ArrayBuffer` node for a drained body.
    fn fresh_buffer(&mut self, bytes: Vec<u8>) -> Node {
        Node::ArrayBuffer {
            id: self.state.ids.fresh(),
            bytes,
        }
    }

    /// Builds the options record for errors; `errors` is non-empty for
    /// aggregate errors and rides under the `errors` key.
    fn parse_error_options(
        &mut self,
        props: &[(String, JsValue)],
        errors: &[JsValue],
    ) -> Result<Option<ObjectRecord>> {
        let mut record = ObjectRecord::default();
        if !errors.is_empty() {
            let array = self.parse_fresh_array(errors)?;
            record.keys.push(PropKey::String("errors".into()));
            record.values.push(array);
        }
        let kept: Vec<(String, JsValue)> =
            super::error_option_props(self.state.features, props)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
        for (key, value) in kept {
            record.keys.push(PropKey::String(key));
            record.values.push(self.parse(&value)?);
        }
        Ok(if record.is_empty() {
            None
        } else {
            Some(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::IdSpace;
    use crate::plugin::PluginRegistry;
    use crate::registry::ReferenceRegistry;
    use std::rc::Rc;

    fn parser() -> SyncParser {
        SyncParser::new(ParserState::new(
            Feature::all(),
            PluginRegistry::new(),
            Rc::new(ReferenceRegistry::new()),
            IdSpace::local(),
        ))
    }

    #[test]
    fn dedup_emits_indexed_value() {
        let shared = JsValue::empty_object();
        let root = JsValue::array(vec![shared.clone(), shared]);
        let mut p = parser();
        let node = p.parse(&root).unwrap();
        match node {
            Node::Array { items, .. } => {
                assert!(matches!(items[0], Some(Node::Object { .. })));
                assert!(matches!(items[1], Some(Node::IndexedValue(_))));
            }
            other => panic!("expected array node, got {other:?}"),
        }
    }

    #[test]
    fn cycles_reference_the_ancestor_id() {
        let obj = JsValue::empty_object();
        obj.set_prop("self", obj.clone());
        let mut p = parser();
        let node = p.parse(&obj).unwrap();
        match node {
            Node::Object { id, record, .. } => {
                assert_eq!(record.values.len(), 1);
                assert_eq!(record.values[0], Node::IndexedValue(id));
            }
            other => panic!("expected object node, got {other:?}"),
        }
    }

    #[test]
    fn promises_are_rejected_in_strict_mode() {
        let mut p = parser();
        let err = p
            .parse(&JsValue::promise_resolved(JsValue::number(1.0)))
            .unwrap_err();
        assert_eq!(err, VivicodeError::UnsupportedType("Promise"));
    }

    #[test]
    fn disabled_map_is_rejected() {
        let mut p = SyncParser::new(ParserState::new(
            Feature::enabled_from_disabled(Feature::MAP),
            PluginRegistry::new(),
            Rc::new(ReferenceRegistry::new()),
            IdSpace::local(),
        ));
        let err = p.parse(&JsValue::map(vec![])).unwrap_err();
        assert_eq!(err, VivicodeError::FeatureDisabled("Map"));
    }

    #[test]
    fn streaming_mode_queues_promise_settlements() {
        let pending = Rc::new(RefCell::new(Vec::new()));
        let mut p = SyncParser::new_streaming(
            ParserState::new(
                Feature::all(),
                PluginRegistry::new(),
                Rc::new(ReferenceRegistry::new()),
                IdSpace::local(),
            ),
            Rc::clone(&pending),
        );
        let node = p
            .parse(&JsValue::promise_resolved(JsValue::number(1.0)))
            .unwrap();
        assert!(matches!(node, Node::PromiseConstructor { .. }));
        assert_eq!(pending.borrow().len(), 1);
    }
}
