//! The persisted JSON form of the node tree.
//!
//! This module specifies the wire representation of the IR, the lossless
//! bridge between [`JsonNode`] and [`Node`], and the direct reconstruction
//! of a value graph from IR (`from_json`). Understanding this layout is
//! essential for implementing emitters in other languages or debugging
//! hand-built trees.
//!
//! ## Record Layout
//!
//! A node is the sparse record `{t, i?, s?, l?, c?, m?, p?, e?, a?, f?, b?,
//! o?}`; unused fields are omitted. `t` is the numeric tag, `i` the
//! reference id; the remaining fields are reused per tag:
//!
//! ```text
//! Tag                        | Fields
//! ---------------------------|------------------------------------------
//! 0  Number                  | s = value
//! 1  String                  | s = raw payload
//! 2  Constant                | s = code (0..=7, see ConstantValue)
//! 3  BigInt                  | s = decimal digits
//! 4  IndexedValue            | i = target id
//! 5  Reference               | i, s = registry tag
//! 6  Array                   | i, l = length, a = items (null = hole), o
//! 7  Object                  | i, p = record, o
//! 8  NullConstructor         | i, p = record, o
//! 9  Date                    | i, s = epoch milliseconds
//! 10 RegExp                  | i, c = source, m = flags
//! 11 Error                   | i, c = constructor, m = message, p?
//! 12 AggregateError          | i, m = message, p?
//! 13 Boxed                   | i, f = inner
//! 14 ArrayBuffer             | i, s = byte array
//! 15 TypedArray              | i, c = constructor, f = buffer, b, l
//! 16 BigIntTypedArray        | i, c = constructor, f = buffer, b, l
//! 17 DataView                | i, c = "DataView", f = buffer, b, l
//! 18 Map                     | i, e = record (node keys)
//! 19 Set                     | i, a = items
//! 20 Promise                 | i, s = status (0 reject, 1 resolve), f
//! 21 WellKnownSymbol         | i, s = code (see WellKnownSymbol)
//! 22 Plugin                  | i, c = tag, s = payload
//! 23 URL                     | i, s = href
//! 24 URLSearchParams         | i, s = init string
//! 25 Blob                    | i, c = type, f = buffer
//! 26 File                    | i, m = name, c = type, s = lastModified, f
//! 27 Headers                 | i, e = record (string keys)
//! 28 FormData                | i, e = record (string keys)
//! 29 Request                 | i, s = url, f = options
//! 30 Response                | i, a = [body?], f = options
//! 31 Event                   | i, s = type, f = options
//! 32 CustomEvent             | i, s = type, f = options
//! 33 DOMException            | i, m = message, c = name
//! 34 ReadableStream          | i, a = event nodes (tags 39..=41)
//! 35 PromiseConstructor      | i
//! 36 PromiseResolve          | i, f = value
//! 37 PromiseReject           | i, f = value
//! 38 ReadableStreamConstructor | i
//! 39 ReadableStreamEnqueue   | i, f = chunk
//! 40 ReadableStreamError     | i, f = payload
//! 41 ReadableStreamClose     | i
//! ```
//!
//! Records (`p`, `e`) are `{k, v, s}`: parallel key/value arrays plus an
//! explicit size so truncated records are detectable. Object-record keys
//! are raw strings, or the number `0` for the iterator-installation
//! sentinel; Map records hold full nodes as keys.
//!
//! String payloads are stored raw — JSON transport applies its own
//! escaping, and the source-text escaping happens at emission.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VivicodeError};
use crate::escape::form_urldecode;
use crate::ir::{
    ConstantValue, ErrorKind, Node, ObjectFlag, ObjectRecord, PlainRecord, PropKey, RefId,
    StreamEventNode, TypedArrayKind, WellKnownSymbol,
};
use crate::plugin::PluginRegistry;
use crate::registry::ReferenceRegistry;
use crate::value::{JsValue, StreamMessage};

/// Numeric tags of the persisted form.
#[allow(missing_docs)]
pub mod tags {
    pub const NUMBER: u8 = 0;
    pub const STRING: u8 = 1;
    pub const CONSTANT: u8 = 2;
    pub const BIGINT: u8 = 3;
    pub const INDEXED_VALUE: u8 = 4;
    pub const REFERENCE: u8 = 5;
    pub const ARRAY: u8 = 6;
    pub const OBJECT: u8 = 7;
    pub const NULL_CONSTRUCTOR: u8 = 8;
    pub const DATE: u8 = 9;
    pub const REGEXP: u8 = 10;
    pub const ERROR: u8 = 11;
    pub const AGGREGATE_ERROR: u8 = 12;
    pub const BOXED: u8 = 13;
    pub const ARRAY_BUFFER: u8 = 14;
    pub const TYPED_ARRAY: u8 = 15;
    pub const BIGINT_TYPED_ARRAY: u8 = 16;
    pub const DATA_VIEW: u8 = 17;
    pub const MAP: u8 = 18;
    pub const SET: u8 = 19;
    pub const PROMISE: u8 = 20;
    pub const WELL_KNOWN_SYMBOL: u8 = 21;
    pub const PLUGIN: u8 = 22;
    pub const URL: u8 = 23;
    pub const URL_SEARCH_PARAMS: u8 = 24;
    pub const BLOB: u8 = 25;
    pub const FILE: u8 = 26;
    pub const HEADERS: u8 = 27;
    pub const FORM_DATA: u8 = 28;
    pub const REQUEST: u8 = 29;
    pub const RESPONSE: u8 = 30;
    pub const EVENT: u8 = 31;
    pub const CUSTOM_EVENT: u8 = 32;
    pub const DOM_EXCEPTION: u8 = 33;
    pub const READABLE_STREAM: u8 = 34;
    pub const PROMISE_CONSTRUCTOR: u8 = 35;
    pub const PROMISE_RESOLVE: u8 = 36;
    pub const PROMISE_REJECT: u8 = 37;
    pub const READABLE_STREAM_CONSTRUCTOR: u8 = 38;
    pub const READABLE_STREAM_ENQUEUE: u8 = 39;
    pub const READABLE_STREAM_ERROR: u8 = 40;
    pub const READABLE_STREAM_CLOSE: u8 = 41;
}

/// A record in the persisted form: parallel key/value arrays plus an
/// explicit size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JsonRecord {
    /// Keys: strings, the number `0` (iterator sentinel), or nodes (Map).
    pub k: Vec<Value>,
    /// Value nodes, index-parallel to `k`.
    pub v: Vec<JsonNode>,
    /// Declared size; must equal both array lengths.
    pub s: u32,
}

/// One node of the persisted tree. See the module docs for the per-tag
/// field layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JsonNode {
    /// Numeric tag.
    pub t: u8,
    /// Reference id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<u32>,
    /// Scalar payload (strings, numbers, codes, byte arrays).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<Value>,
    /// Length / size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<u32>,
    /// Constructor name / content string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
    /// Message / name string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
    /// Object-property record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<JsonRecord>,
    /// Entry record (Map, Headers, FormData).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<JsonRecord>,
    /// Child list; `null` entries are array holes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Vec<Option<JsonNode>>>,
    /// Single child node (buffers, payloads, option dictionaries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f: Option<Box<JsonNode>>,
    /// Byte offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<u32>,
    /// Object integrity flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o: Option<u8>,
}

// --- NODE → JSON ---

fn id_of(id: RefId) -> Option<u32> {
    Some(id.as_u32())
}

fn record_to_json(record: &ObjectRecord) -> JsonRecord {
    JsonRecord {
        k: record
            .keys
            .iter()
            .map(|key| match key {
                PropKey::String(s) => Value::String(s.clone()),
                PropKey::SymbolIterator => Value::from(0u8),
            })
            .collect(),
        v: record.values.iter().map(node_to_json).collect(),
        s: record.len() as u32,
    }
}

fn plain_record_to_json(record: &PlainRecord) -> JsonRecord {
    JsonRecord {
        k: record.keys.iter().cloned().map(Value::String).collect(),
        v: record.values.iter().map(node_to_json).collect(),
        s: record.len() as u32,
    }
}

/// Converts a node tree into its persisted form.
pub(crate) fn node_to_json(node: &Node) -> JsonNode {
    let mut out = JsonNode::default();
    match node {
        Node::Number(n) => {
            out.t = tags::NUMBER;
            out.s = Some(json_number(*n));
        }
        Node::String(s) => {
            out.t = tags::STRING;
            out.s = Some(Value::String(s.clone()));
        }
        Node::Constant(c) => {
            out.t = tags::CONSTANT;
            out.s = Some(Value::from(c.as_u8()));
        }
        Node::BigInt(digits) => {
            out.t = tags::BIGINT;
            out.s = Some(Value::String(digits.clone()));
        }
        Node::IndexedValue(id) => {
            out.t = tags::INDEXED_VALUE;
            out.i = id_of(*id);
        }
        Node::Reference { id, tag } => {
            out.t = tags::REFERENCE;
            out.i = id_of(*id);
            out.s = Some(Value::String(tag.clone()));
        }
        Node::Array {
            id,
            length,
            items,
            flag,
        } => {
            out.t = tags::ARRAY;
            out.i = id_of(*id);
            out.l = Some(*length);
            out.a = Some(
                items
                    .iter()
                    .map(|item| item.as_ref().map(node_to_json))
                    .collect(),
            );
            out.o = flag_to_json(*flag);
        }
        Node::Object { id, record, flag } | Node::NullConstructor { id, record, flag } => {
            out.t = if matches!(node, Node::Object { .. }) {
                tags::OBJECT
            } else {
                tags::NULL_CONSTRUCTOR
            };
            out.i = id_of(*id);
            out.p = Some(record_to_json(record));
            out.o = flag_to_json(*flag);
        }
        Node::Date { id, epoch_ms } => {
            out.t = tags::DATE;
            out.i = id_of(*id);
            out.s = Some(json_number(*epoch_ms));
        }
        Node::RegExp { id, source, flags } => {
            out.t = tags::REGEXP;
            out.i = id_of(*id);
            out.c = Some(source.clone());
            out.m = Some(flags.clone());
        }
        Node::Error {
            id,
            kind,
            message,
            options,
        } => {
            out.t = tags::ERROR;
            out.i = id_of(*id);
            out.c = Some(kind.constructor().to_string());
            out.m = Some(message.clone());
            out.p = options.as_ref().map(record_to_json);
        }
        Node::AggregateError {
            id,
            message,
            options,
        } => {
            out.t = tags::AGGREGATE_ERROR;
            out.i = id_of(*id);
            out.m = Some(message.clone());
            out.p = options.as_ref().map(record_to_json);
        }
        Node::Boxed { id, inner } => {
            out.t = tags::BOXED;
            out.i = id_of(*id);
            out.f = Some(Box::new(node_to_json(inner)));
        }
        Node::ArrayBuffer { id, bytes } => {
            out.t = tags::ARRAY_BUFFER;
            out.i = id_of(*id);
            out.s = Some(Value::from(bytes.clone()));
        }
        Node::TypedArray {
            id,
            kind,
            buffer,
            byte_offset,
            length,
        } => {
            out.t = if *kind == TypedArrayKind::DataView {
                tags::DATA_VIEW
            } else if kind.is_big_int() {
                tags::BIGINT_TYPED_ARRAY
            } else {
                tags::TYPED_ARRAY
            };
            out.i = id_of(*id);
            out.c = Some(kind.constructor().to_string());
            out.f = Some(Box::new(node_to_json(buffer)));
            out.b = Some(*byte_offset);
            out.l = Some(*length);
        }
        Node::Map { id, keys, values } => {
            out.t = tags::MAP;
            out.i = id_of(*id);
            out.e = Some(JsonRecord {
                k: keys
                    .iter()
                    .map(|key| {
                        serde_json::to_value(node_to_json(key)).unwrap_or(Value::Null)
                    })
                    .collect(),
                v: values.iter().map(node_to_json).collect(),
                s: keys.len() as u32,
            });
        }
        Node::Set { id, items } => {
            out.t = tags::SET;
            out.i = id_of(*id);
            out.a = Some(items.iter().map(|item| Some(node_to_json(item))).collect());
        }
        Node::Promise {
            id,
            resolved,
            value,
        } => {
            out.t = tags::PROMISE;
            out.i = id_of(*id);
            out.s = Some(Value::from(u8::from(*resolved)));
            out.f = Some(Box::new(node_to_json(value)));
        }
        Node::WellKnownSymbol { id, symbol } => {
            out.t = tags::WELL_KNOWN_SYMBOL;
            out.i = id_of(*id);
            out.s = Some(Value::from(symbol.as_u8()));
        }
        Node::Plugin { id, tag, payload } => {
            out.t = tags::PLUGIN;
            out.i = id_of(*id);
            out.c = Some(tag.clone());
            out.s = Some(payload.clone());
        }
        Node::Url { id, href } => {
            out.t = tags::URL;
            out.i = id_of(*id);
            out.s = Some(Value::String(href.clone()));
        }
        Node::UrlSearchParams { id, init } => {
            out.t = tags::URL_SEARCH_PARAMS;
            out.i = id_of(*id);
            out.s = Some(Value::String(init.clone()));
        }
        Node::Blob {
            id,
            content_type,
            buffer,
        } => {
            out.t = tags::BLOB;
            out.i = id_of(*id);
            out.c = Some(content_type.clone());
            out.f = Some(Box::new(node_to_json(buffer)));
        }
        Node::File {
            id,
            name,
            content_type,
            last_modified,
            buffer,
        } => {
            out.t = tags::FILE;
            out.i = id_of(*id);
            out.m = Some(name.clone());
            out.c = Some(content_type.clone());
            out.s = Some(json_number(*last_modified));
            out.f = Some(Box::new(node_to_json(buffer)));
        }
        Node::Headers { id, record } => {
            out.t = tags::HEADERS;
            out.i = id_of(*id);
            out.e = Some(plain_record_to_json(record));
        }
        Node::FormData { id, record } => {
            out.t = tags::FORM_DATA;
            out.i = id_of(*id);
            out.e = Some(plain_record_to_json(record));
        }
        Node::Request { id, url, options } => {
            out.t = tags::REQUEST;
            out.i = id_of(*id);
            out.s = Some(Value::String(url.clone()));
            out.f = Some(Box::new(node_to_json(options)));
        }
        Node::Response { id, body, options } => {
            out.t = tags::RESPONSE;
            out.i = id_of(*id);
            out.a = Some(
                body.iter()
                    .map(|b| Some(node_to_json(b)))
                    .collect(),
            );
            out.f = Some(Box::new(node_to_json(options)));
        }
        Node::Event { id, name, options } => {
            out.t = tags::EVENT;
            out.i = id_of(*id);
            out.s = Some(Value::String(name.clone()));
            out.f = Some(Box::new(node_to_json(options)));
        }
        Node::CustomEvent { id, name, options } => {
            out.t = tags::CUSTOM_EVENT;
            out.i = id_of(*id);
            out.s = Some(Value::String(name.clone()));
            out.f = Some(Box::new(node_to_json(options)));
        }
        Node::DomException { id, message, name } => {
            out.t = tags::DOM_EXCEPTION;
            out.i = id_of(*id);
            out.m = Some(message.clone());
            out.c = Some(name.clone());
        }
        Node::ReadableStream { id, events } => {
            out.t = tags::READABLE_STREAM;
            out.i = id_of(*id);
            out.a = Some(
                events
                    .iter()
                    .map(|event| {
                        let mut child = JsonNode {
                            i: id_of(*id),
                            ..JsonNode::default()
                        };
                        match event {
                            StreamEventNode::Enqueue(n) => {
                                child.t = tags::READABLE_STREAM_ENQUEUE;
                                child.f = Some(Box::new(node_to_json(n)));
                            }
                            StreamEventNode::Error(n) => {
                                child.t = tags::READABLE_STREAM_ERROR;
                                child.f = Some(Box::new(node_to_json(n)));
                            }
                            StreamEventNode::Close => {
                                child.t = tags::READABLE_STREAM_CLOSE;
                            }
                        }
                        Some(child)
                    })
                    .collect(),
            );
        }
        Node::PromiseConstructor { id } => {
            out.t = tags::PROMISE_CONSTRUCTOR;
            out.i = id_of(*id);
        }
        Node::PromiseResolve { id, value } => {
            out.t = tags::PROMISE_RESOLVE;
            out.i = id_of(*id);
            out.f = Some(Box::new(node_to_json(value)));
        }
        Node::PromiseReject { id, value } => {
            out.t = tags::PROMISE_REJECT;
            out.i = id_of(*id);
            out.f = Some(Box::new(node_to_json(value)));
        }
        Node::ReadableStreamConstructor { id } => {
            out.t = tags::READABLE_STREAM_CONSTRUCTOR;
            out.i = id_of(*id);
        }
        Node::ReadableStreamEnqueue { id, value } => {
            out.t = tags::READABLE_STREAM_ENQUEUE;
            out.i = id_of(*id);
            out.f = Some(Box::new(node_to_json(value)));
        }
        Node::ReadableStreamError { id, value } => {
            out.t = tags::READABLE_STREAM_ERROR;
            out.i = id_of(*id);
            out.f = Some(Box::new(node_to_json(value)));
        }
        Node::ReadableStreamClose { id } => {
            out.t = tags::READABLE_STREAM_CLOSE;
            out.i = id_of(*id);
        }
    }
    out
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        // Non-finite numbers take the Constant strategy, so this arm only
        // exists for hand-built trees.
        .unwrap_or(Value::Null)
}

fn flag_to_json(flag: ObjectFlag) -> Option<u8> {
    match flag {
        ObjectFlag::None => None,
        other => Some(other.as_u8()),
    }
}

// --- JSON → NODE ---

fn malformed(what: &str, t: u8) -> VivicodeError {
    VivicodeError::Invariant(format!("malformed IR: {what} (tag {t})"))
}

impl JsonNode {
    fn need_id(&self) -> Result<RefId> {
        self.i
            .map(RefId::new)
            .ok_or_else(|| malformed("missing id", self.t))
    }

    fn need_s(&self) -> Result<&Value> {
        self.s.as_ref().ok_or_else(|| malformed("missing s", self.t))
    }

    fn need_string(&self, field: &Option<String>, name: &str) -> Result<String> {
        field
            .clone()
            .ok_or_else(|| malformed(&format!("missing {name}"), self.t))
    }

    fn need_f(&self) -> Result<Node> {
        self.f
            .as_ref()
            .ok_or_else(|| malformed("missing child", self.t))?
            .to_node()
    }

    fn s_string(&self) -> Result<String> {
        match self.need_s()? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(malformed("s is not a string", self.t)),
        }
    }

    fn s_number(&self) -> Result<f64> {
        match self.need_s()? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| malformed("s is not finite", self.t)),
            _ => Err(malformed("s is not a number", self.t)),
        }
    }

    fn s_code(&self) -> Result<u8> {
        match self.need_s()? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| malformed("s is out of range", self.t)),
            _ => Err(malformed("s is not a code", self.t)),
        }
    }

    fn object_record(&self, record: &JsonRecord) -> Result<ObjectRecord> {
        if record.k.len() != record.v.len() || record.k.len() != record.s as usize {
            return Err(malformed("record size mismatch", self.t));
        }
        let mut keys = Vec::with_capacity(record.k.len());
        for key in &record.k {
            keys.push(match key {
                Value::String(s) => PropKey::String(s.clone()),
                Value::Number(n) if n.as_u64() == Some(0) => PropKey::SymbolIterator,
                _ => return Err(malformed("bad record key", self.t)),
            });
        }
        let values = record
            .v
            .iter()
            .map(JsonNode::to_node)
            .collect::<Result<Vec<_>>>()?;
        Ok(ObjectRecord { keys, values })
    }

    fn plain_record(&self, record: &JsonRecord) -> Result<PlainRecord> {
        if record.k.len() != record.v.len() || record.k.len() != record.s as usize {
            return Err(malformed("record size mismatch", self.t));
        }
        let mut keys = Vec::with_capacity(record.k.len());
        for key in &record.k {
            match key {
                Value::String(s) => keys.push(s.clone()),
                _ => return Err(malformed("bad record key", self.t)),
            }
        }
        let values = record
            .v
            .iter()
            .map(JsonNode::to_node)
            .collect::<Result<Vec<_>>>()?;
        Ok(PlainRecord { keys, values })
    }

    fn flag(&self) -> Result<ObjectFlag> {
        match self.o {
            None => Ok(ObjectFlag::None),
            Some(raw) => {
                ObjectFlag::from_u8(raw).ok_or_else(|| malformed("bad object flag", self.t))
            }
        }
    }

    /// Validates and converts the persisted record into a node.
    pub(crate) fn to_node(&self) -> Result<Node> {
        match self.t {
            tags::NUMBER => Ok(Node::Number(self.s_number()?)),
            tags::STRING => Ok(Node::String(self.s_string()?)),
            tags::CONSTANT => ConstantValue::from_u8(self.s_code()?)
                .map(Node::Constant)
                .ok_or_else(|| malformed("bad constant code", self.t)),
            tags::BIGINT => Ok(Node::BigInt(self.s_string()?)),
            tags::INDEXED_VALUE => Ok(Node::IndexedValue(self.need_id()?)),
            tags::REFERENCE => Ok(Node::Reference {
                id: self.need_id()?,
                tag: self.s_string()?,
            }),
            tags::ARRAY => {
                let items = self
                    .a
                    .as_ref()
                    .ok_or_else(|| malformed("missing items", self.t))?;
                let length = self.l.ok_or_else(|| malformed("missing length", self.t))?;
                if items.len() != length as usize {
                    return Err(malformed("length/items mismatch", self.t));
                }
                let items = items
                    .iter()
                    .map(|item| item.as_ref().map(JsonNode::to_node).transpose())
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Array {
                    id: self.need_id()?,
                    length,
                    items,
                    flag: self.flag()?,
                })
            }
            tags::OBJECT | tags::NULL_CONSTRUCTOR => {
                let record = self
                    .p
                    .as_ref()
                    .ok_or_else(|| malformed("missing record", self.t))?;
                let record = self.object_record(record)?;
                let id = self.need_id()?;
                let flag = self.flag()?;
                Ok(if self.t == tags::OBJECT {
                    Node::Object { id, record, flag }
                } else {
                    Node::NullConstructor { id, record, flag }
                })
            }
            tags::DATE => Ok(Node::Date {
                id: self.need_id()?,
                epoch_ms: self.s_number()?,
            }),
            tags::REGEXP => Ok(Node::RegExp {
                id: self.need_id()?,
                source: self.need_string(&self.c, "source")?,
                flags: self.need_string(&self.m, "flags")?,
            }),
            tags::ERROR => {
                let constructor = self.need_string(&self.c, "constructor")?;
                let kind = ErrorKind::from_constructor(&constructor)
                    .ok_or_else(|| malformed("unknown error constructor", self.t))?;
                Ok(Node::Error {
                    id: self.need_id()?,
                    kind,
                    message: self.need_string(&self.m, "message")?,
                    options: match &self.p {
                        Some(record) => Some(self.object_record(record)?),
                        None => None,
                    },
                })
            }
            tags::AGGREGATE_ERROR => Ok(Node::AggregateError {
                id: self.need_id()?,
                message: self.need_string(&self.m, "message")?,
                options: match &self.p {
                    Some(record) => Some(self.object_record(record)?),
                    None => None,
                },
            }),
            tags::BOXED => Ok(Node::Boxed {
                id: self.need_id()?,
                inner: Box::new(self.need_f()?),
            }),
            tags::ARRAY_BUFFER => {
                let bytes = match self.need_s()? {
                    Value::Array(raw) => raw
                        .iter()
                        .map(|b| {
                            b.as_u64()
                                .and_then(|v| u8::try_from(v).ok())
                                .ok_or_else(|| malformed("bad byte", self.t))
                        })
                        .collect::<Result<Vec<u8>>>()?,
                    _ => return Err(malformed("s is not a byte array", self.t)),
                };
                Ok(Node::ArrayBuffer {
                    id: self.need_id()?,
                    bytes,
                })
            }
            tags::TYPED_ARRAY | tags::BIGINT_TYPED_ARRAY | tags::DATA_VIEW => {
                let constructor = self.need_string(&self.c, "constructor")?;
                let kind = TypedArrayKind::from_constructor(&constructor)
                    .ok_or_else(|| malformed("unknown view constructor", self.t))?;
                Ok(Node::TypedArray {
                    id: self.need_id()?,
                    kind,
                    buffer: Box::new(self.need_f()?),
                    byte_offset: self.b.unwrap_or(0),
                    length: self.l.ok_or_else(|| malformed("missing length", self.t))?,
                })
            }
            tags::MAP => {
                let record = self
                    .e
                    .as_ref()
                    .ok_or_else(|| malformed("missing entries", self.t))?;
                if record.k.len() != record.v.len() || record.k.len() != record.s as usize {
                    return Err(malformed("record size mismatch", self.t));
                }
                let keys = record
                    .k
                    .iter()
                    .map(|key| {
                        serde_json::from_value::<JsonNode>(key.clone())
                            .map_err(|_| malformed("bad map key", self.t))
                            .and_then(|n| n.to_node())
                    })
                    .collect::<Result<Vec<_>>>()?;
                let values = record
                    .v
                    .iter()
                    .map(JsonNode::to_node)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Map {
                    id: self.need_id()?,
                    keys,
                    values,
                })
            }
            tags::SET => {
                let items = self
                    .a
                    .as_ref()
                    .ok_or_else(|| malformed("missing items", self.t))?
                    .iter()
                    .map(|item| {
                        item.as_ref()
                            .ok_or_else(|| malformed("hole in set", self.t))
                            .and_then(JsonNode::to_node)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Set {
                    id: self.need_id()?,
                    items,
                })
            }
            tags::PROMISE => Ok(Node::Promise {
                id: self.need_id()?,
                resolved: self.s_code()? == 1,
                value: Box::new(self.need_f()?),
            }),
            tags::WELL_KNOWN_SYMBOL => WellKnownSymbol::from_u8(self.s_code()?)
                .map(|symbol| Node::WellKnownSymbol {
                    id: RefId::new(self.i.unwrap_or(0)),
                    symbol,
                })
                .ok_or_else(|| malformed("bad symbol code", self.t)),
            tags::PLUGIN => Ok(Node::Plugin {
                id: self.need_id()?,
                tag: self.need_string(&self.c, "tag")?,
                payload: self.need_s()?.clone(),
            }),
            tags::URL => Ok(Node::Url {
                id: self.need_id()?,
                href: self.s_string()?,
            }),
            tags::URL_SEARCH_PARAMS => Ok(Node::UrlSearchParams {
                id: self.need_id()?,
                init: self.s_string()?,
            }),
            tags::BLOB => Ok(Node::Blob {
                id: self.need_id()?,
                content_type: self.need_string(&self.c, "type")?,
                buffer: Box::new(self.need_f()?),
            }),
            tags::FILE => Ok(Node::File {
                id: self.need_id()?,
                name: self.need_string(&self.m, "name")?,
                content_type: self.need_string(&self.c, "type")?,
                last_modified: self.s_number()?,
                buffer: Box::new(self.need_f()?),
            }),
            tags::HEADERS | tags::FORM_DATA => {
                let record = self
                    .e
                    .as_ref()
                    .ok_or_else(|| malformed("missing entries", self.t))?;
                let record = self.plain_record(record)?;
                let id = self.need_id()?;
                Ok(if self.t == tags::HEADERS {
                    Node::Headers { id, record }
                } else {
                    Node::FormData { id, record }
                })
            }
            tags::REQUEST => Ok(Node::Request {
                id: self.need_id()?,
                url: self.s_string()?,
                options: Box::new(self.need_f()?),
            }),
            tags::RESPONSE => {
                let body = match self.a.as_ref().and_then(|a| a.first()) {
                    Some(Some(node)) => Some(Box::new(node.to_node()?)),
                    _ => None,
                };
                Ok(Node::Response {
                    id: self.need_id()?,
                    body,
                    options: Box::new(self.need_f()?),
                })
            }
            tags::EVENT | tags::CUSTOM_EVENT => {
                let id = self.need_id()?;
                let name = self.s_string()?;
                let options = Box::new(self.need_f()?);
                Ok(if self.t == tags::EVENT {
                    Node::Event { id, name, options }
                } else {
                    Node::CustomEvent { id, name, options }
                })
            }
            tags::DOM_EXCEPTION => Ok(Node::DomException {
                id: self.need_id()?,
                message: self.need_string(&self.m, "message")?,
                name: self.need_string(&self.c, "name")?,
            }),
            tags::READABLE_STREAM => {
                let events = self
                    .a
                    .as_ref()
                    .ok_or_else(|| malformed("missing events", self.t))?
                    .iter()
                    .map(|event| {
                        let event = event
                            .as_ref()
                            .ok_or_else(|| malformed("hole in events", self.t))?;
                        Ok(match event.t {
                            tags::READABLE_STREAM_ENQUEUE => {
                                StreamEventNode::Enqueue(event.need_f()?)
                            }
                            tags::READABLE_STREAM_ERROR => StreamEventNode::Error(event.need_f()?),
                            tags::READABLE_STREAM_CLOSE => StreamEventNode::Close,
                            _ => return Err(malformed("bad stream event", self.t)),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::ReadableStream {
                    id: self.need_id()?,
                    events,
                })
            }
            tags::PROMISE_CONSTRUCTOR => Ok(Node::PromiseConstructor {
                id: self.need_id()?,
            }),
            tags::PROMISE_RESOLVE => Ok(Node::PromiseResolve {
                id: self.need_id()?,
                value: Box::new(self.need_f()?),
            }),
            tags::PROMISE_REJECT => Ok(Node::PromiseReject {
                id: self.need_id()?,
                value: Box::new(self.need_f()?),
            }),
            tags::READABLE_STREAM_CONSTRUCTOR => Ok(Node::ReadableStreamConstructor {
                id: self.need_id()?,
            }),
            tags::READABLE_STREAM_ENQUEUE => Ok(Node::ReadableStreamEnqueue {
                id: self.need_id()?,
                value: Box::new(self.need_f()?),
            }),
            tags::READABLE_STREAM_ERROR => Ok(Node::ReadableStreamError {
                id: self.need_id()?,
                value: Box::new(self.need_f()?),
            }),
            tags::READABLE_STREAM_CLOSE => Ok(Node::ReadableStreamClose {
                id: self.need_id()?,
            }),
            unknown => Err(VivicodeError::Invariant(format!(
                "malformed IR: unknown tag {unknown}"
            ))),
        }
    }
}

// --- IR → VALUE (from_json) ---

/// Rebuilds a value graph from a node tree.
///
/// Shells are registered in the id table before children are built, so
/// cycles resolve through `IndexedValue` back-references. The table can be
/// shared between calls (cross-from-JSON).
pub(crate) struct ValueBuilder {
    table: Rc<std::cell::RefCell<HashMap<u32, JsValue>>>,
    registry: Rc<ReferenceRegistry>,
    plugins: PluginRegistry,
}

impl ValueBuilder {
    pub fn new(registry: Rc<ReferenceRegistry>, plugins: PluginRegistry) -> Self {
        Self {
            table: Rc::new(std::cell::RefCell::new(HashMap::new())),
            registry,
            plugins,
        }
    }

    /// Shares a caller-supplied id table (cross mode).
    pub fn with_table(
        table: Rc<std::cell::RefCell<HashMap<u32, JsValue>>>,
        registry: Rc<ReferenceRegistry>,
        plugins: PluginRegistry,
    ) -> Self {
        Self {
            table,
            registry,
            plugins,
        }
    }

    fn remember(&self, id: RefId, value: &JsValue) {
        self.table
            .borrow_mut()
            .insert(id.as_u32(), value.clone());
    }

    fn recall(&self, id: RefId) -> Result<JsValue> {
        self.table
            .borrow()
            .get(&id.as_u32())
            .cloned()
            .ok_or_else(|| {
                VivicodeError::Invariant(format!("malformed IR: dangling reference {id}"))
            })
    }

    fn build_record_into(&mut self, target: &JsValue, record: &ObjectRecord) -> Result<()> {
        for (key, value) in record.keys.iter().zip(&record.values) {
            match key {
                PropKey::String(k) => {
                    let value = self.build(value)?;
                    target.set_prop(k.clone(), value);
                }
                PropKey::SymbolIterator => {
                    // The sentinel's value is the drained-items array.
                    let drained = self.build(value)?;
                    let items = match drained.as_object().map(|o| o.kind()) {
                        Some(kind) => match &*kind {
                            crate::value::ObjectKind::Array { items, .. } => items
                                .iter()
                                .map(|item| item.clone().unwrap_or(JsValue::Undefined))
                                .collect(),
                            _ => Vec::new(),
                        },
                        None => Vec::new(),
                    };
                    target.set_iterator(items);
                }
            }
        }
        Ok(())
    }

    fn error_props(&mut self, options: &Option<ObjectRecord>) -> Result<Vec<(String, JsValue)>> {
        let mut props = Vec::new();
        if let Some(record) = options {
            for (key, value) in record.keys.iter().zip(&record.values) {
                if let PropKey::String(k) = key {
                    props.push((k.clone(), self.build(value)?));
                }
            }
        }
        Ok(props)
    }

    /// Builds the value for one node.
    pub fn build(&mut self, node: &Node) -> Result<JsValue> {
        match node {
            Node::Constant(c) => Ok(match c {
                ConstantValue::True => JsValue::Bool(true),
                ConstantValue::False => JsValue::Bool(false),
                ConstantValue::Undefined => JsValue::Undefined,
                ConstantValue::Null => JsValue::Null,
                ConstantValue::NegZero => JsValue::Number(-0.0),
                ConstantValue::Infinity => JsValue::Number(f64::INFINITY),
                ConstantValue::NegInfinity => JsValue::Number(f64::NEG_INFINITY),
                ConstantValue::NaN => JsValue::Number(f64::NAN),
            }),
            Node::Number(n) => Ok(JsValue::Number(*n)),
            Node::String(s) => Ok(JsValue::string(s.clone())),
            Node::BigInt(digits) => Ok(JsValue::bigint(digits.clone())),
            Node::IndexedValue(id) => self.recall(*id),
            Node::Reference { id, tag } => {
                let value = self.registry.lookup(tag).ok_or_else(|| {
                    VivicodeError::Invariant(format!("unknown reference tag {tag:?}"))
                })?;
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Array {
                id, items, flag, ..
            } => {
                let value = JsValue::array_with_holes(vec![None; items.len()]);
                self.remember(*id, &value);
                for (index, item) in items.iter().enumerate() {
                    if let Some(item) = item {
                        let built = self.build(item)?;
                        value.set_index(index, built);
                    }
                }
                value.set_flag(*flag);
                Ok(value)
            }
            Node::Object { id, record, flag } => {
                let value = JsValue::empty_object();
                self.remember(*id, &value);
                self.build_record_into(&value, record)?;
                value.set_flag(*flag);
                Ok(value)
            }
            Node::NullConstructor { id, record, flag } => {
                let value = JsValue::null_proto_object(Vec::<(String, JsValue)>::new());
                self.remember(*id, &value);
                self.build_record_into(&value, record)?;
                value.set_flag(*flag);
                Ok(value)
            }
            Node::Date { id, epoch_ms } => {
                let value = JsValue::date(*epoch_ms);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::RegExp { id, source, flags } => {
                let value = JsValue::regexp(source.clone(), flags.clone());
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Error {
                id,
                kind,
                message,
                options,
            } => {
                let value = JsValue::error(*kind, message.clone());
                self.remember(*id, &value);
                let props = self.error_props(options)?;
                if let Some(obj) = value.as_object() {
                    if let crate::value::ObjectKind::Error { props: slot, .. } = &mut *obj.kind_mut()
                    {
                        *slot = props;
                    }
                }
                Ok(value)
            }
            Node::AggregateError {
                id,
                message,
                options,
            } => {
                let value = JsValue::aggregate_error(message.clone(), Vec::new());
                self.remember(*id, &value);
                let mut props = self.error_props(options)?;
                let mut errors = Vec::new();
                props.retain(|(key, prop)| {
                    if key == "errors" {
                        if let Some(obj) = prop.as_object() {
                            if let crate::value::ObjectKind::Array { items, .. } = &*obj.kind() {
                                errors = items
                                    .iter()
                                    .map(|item| item.clone().unwrap_or(JsValue::Undefined))
                                    .collect();
                            }
                        }
                        false
                    } else {
                        true
                    }
                });
                if let Some(obj) = value.as_object() {
                    if let crate::value::ObjectKind::AggregateError {
                        errors: error_slot,
                        props: prop_slot,
                        ..
                    } = &mut *obj.kind_mut()
                    {
                        *error_slot = errors;
                        *prop_slot = props;
                    }
                }
                Ok(value)
            }
            Node::Boxed { id, inner } => {
                let inner = self.build(inner)?;
                let value = JsValue::boxed(inner);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::ArrayBuffer { id, bytes } => {
                let value = JsValue::array_buffer(bytes.clone());
                self.remember(*id, &value);
                Ok(value)
            }
            Node::TypedArray {
                id,
                kind,
                buffer,
                byte_offset,
                length,
            } => {
                let buffer = self.build(buffer)?;
                let value = JsValue::typed_array(*kind, buffer, *byte_offset, *length);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Map { id, keys, values } => {
                let value = JsValue::map(Vec::new());
                self.remember(*id, &value);
                for (key, val) in keys.iter().zip(values) {
                    let key = self.build(key)?;
                    let val = self.build(val)?;
                    value.map_set(key, val);
                }
                Ok(value)
            }
            Node::Set { id, items } => {
                let value = JsValue::set(Vec::new());
                self.remember(*id, &value);
                for item in items {
                    let item = self.build(item)?;
                    value.set_add(item);
                }
                Ok(value)
            }
            Node::Promise {
                id,
                resolved,
                value,
            } => {
                let shell = JsValue::Object(crate::value::JsObject::new(
                    crate::value::ObjectKind::Promise(crate::value::PromiseState::Pending(None)),
                ));
                self.remember(*id, &shell);
                let payload = self.build(value)?;
                shell.settle_promise(if *resolved {
                    Ok(payload)
                } else {
                    Err(payload)
                });
                Ok(shell)
            }
            Node::WellKnownSymbol { id, symbol } => {
                let value = JsValue::Symbol(*symbol);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Plugin { id, tag, payload } => {
                let value = {
                    let plugin = self.plugins.find_by_tag(tag)?;
                    plugin.deserialize(payload)?
                };
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Url { id, href } => {
                let value = JsValue::url(href.clone());
                self.remember(*id, &value);
                Ok(value)
            }
            Node::UrlSearchParams { id, init } => {
                let value = JsValue::url_search_params(form_urldecode(init));
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Blob {
                id,
                content_type,
                buffer,
            } => {
                let bytes = self.buffer_bytes(buffer)?;
                let value = JsValue::blob(content_type.clone(), bytes);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::File {
                id,
                name,
                content_type,
                last_modified,
                buffer,
            } => {
                let bytes = self.buffer_bytes(buffer)?;
                let value =
                    JsValue::file(name.clone(), content_type.clone(), *last_modified, bytes);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Headers { id, record } => {
                let mut entries = Vec::with_capacity(record.len());
                for (key, value) in record.keys.iter().zip(&record.values) {
                    match value {
                        Node::String(s) => entries.push((key.clone(), s.clone())),
                        _ => {
                            return Err(VivicodeError::Invariant(
                                "malformed IR: non-string header value".into(),
                            ))
                        }
                    }
                }
                let value = JsValue::headers(entries);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::FormData { id, record } => {
                let value = JsValue::form_data(Vec::<(String, JsValue)>::new());
                self.remember(*id, &value);
                for (key, entry) in record.keys.iter().zip(&record.values) {
                    let entry = self.build(entry)?;
                    value.form_append(key.clone(), entry);
                }
                Ok(value)
            }
            Node::Request { id, url, options } => {
                let options = self.build(options)?;
                let value = JsValue::request(url.clone(), options);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Response { id, body, options } => {
                let body = match body {
                    Some(b) => Some(self.build(b)?),
                    None => None,
                };
                let options = self.build(options)?;
                let value = JsValue::response(body, options);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::Event { id, name, options } => {
                let options = self.build(options)?;
                let value = JsValue::event(name.clone(), options);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::CustomEvent { id, name, options } => {
                let options = self.build(options)?;
                let value = JsValue::custom_event(name.clone(), options);
                self.remember(*id, &value);
                Ok(value)
            }
            Node::DomException { id, message, name } => {
                let value = JsValue::dom_exception(message.clone(), name.clone());
                self.remember(*id, &value);
                Ok(value)
            }
            Node::ReadableStream { id, events } => {
                let value = JsValue::stream_recorded(Vec::new());
                self.remember(*id, &value);
                for event in events {
                    let message = match event {
                        StreamEventNode::Enqueue(n) => StreamMessage::Next(self.build(n)?),
                        StreamEventNode::Error(n) => StreamMessage::Error(self.build(n)?),
                        StreamEventNode::Close => StreamMessage::Close,
                    };
                    value.stream_push(message);
                }
                Ok(value)
            }
            Node::PromiseConstructor { id } => {
                let shell = JsValue::Object(crate::value::JsObject::new(
                    crate::value::ObjectKind::Promise(crate::value::PromiseState::Pending(None)),
                ));
                self.remember(*id, &shell);
                Ok(shell)
            }
            Node::PromiseResolve { id, value } | Node::PromiseReject { id, value } => {
                let target = self.recall(*id)?;
                let payload = self.build(value)?;
                target.settle_promise(if matches!(node, Node::PromiseResolve { .. }) {
                    Ok(payload)
                } else {
                    Err(payload)
                });
                Ok(target)
            }
            Node::ReadableStreamConstructor { id } => {
                let value = JsValue::stream_recorded(Vec::new());
                self.remember(*id, &value);
                Ok(value)
            }
            Node::ReadableStreamEnqueue { id, value } => {
                let target = self.recall(*id)?;
                let chunk = self.build(value)?;
                target.stream_push(StreamMessage::Next(chunk));
                Ok(target)
            }
            Node::ReadableStreamError { id, value } => {
                let target = self.recall(*id)?;
                let payload = self.build(value)?;
                target.stream_push(StreamMessage::Error(payload));
                Ok(target)
            }
            Node::ReadableStreamClose { id } => {
                let target = self.recall(*id)?;
                target.stream_push(StreamMessage::Close);
                Ok(target)
            }
        }
    }

    /// Resolves a buffer child (direct or aliased) to its bytes.
    fn buffer_bytes(&mut self, buffer: &Node) -> Result<Vec<u8>> {
        let built = self.build(buffer)?;
        if let Some(obj) = built.as_object() {
            if let crate::value::ObjectKind::ArrayBuffer { bytes } = &*obj.kind() {
                return Ok(bytes.clone());
            }
        }
        Err(VivicodeError::Invariant(
            "malformed IR: body buffer is not an ArrayBuffer".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_round_trips_shapes() {
        let node = Node::Array {
            id: RefId::new(0),
            length: 3,
            items: vec![
                Some(Node::Number(1.0)),
                None,
                Some(Node::String("x".into())),
            ],
            flag: ObjectFlag::None,
        };
        let json = node_to_json(&node);
        assert_eq!(json.t, tags::ARRAY);
        let back = json.to_node().unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn unknown_tags_are_malformed() {
        let json = JsonNode {
            t: 250,
            ..JsonNode::default()
        };
        assert!(matches!(
            json.to_node(),
            Err(VivicodeError::Invariant(_))
        ));
    }

    #[test]
    fn record_size_mismatch_is_malformed() {
        let json = JsonNode {
            t: tags::OBJECT,
            i: Some(0),
            p: Some(JsonRecord {
                k: vec![Value::String("a".into())],
                v: vec![],
                s: 1,
            }),
            ..JsonNode::default()
        };
        assert!(json.to_node().is_err());
    }
}
