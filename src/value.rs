//! The host value model.
//!
//! The serializer's input lives in a JavaScript-like runtime; this module is
//! the Rust stand-in for that runtime's heap. Primitives are carried inline,
//! every reference type sits behind an `Rc<JsObject>` whose payload is
//! interior-mutable so user code can close cycles after construction:
//!
//! ```rust
//! use vivicode::JsValue;
//!
//! let obj = JsValue::empty_object();
//! obj.set_prop("self", obj.clone());
//! ```
//!
//! Identity is `Rc` pointer identity; the parser keys its id table on it.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use futures_lite::Stream;

use crate::ir::{ErrorKind, ObjectFlag, TypedArrayKind, WellKnownSymbol};

/// A pending promise body: resolves to the fulfillment value or carries the
/// rejection payload in `Err`.
pub type PromiseFuture = Pin<Box<dyn Future<Output = std::result::Result<JsValue, JsValue>>>>;

/// An async source feeding a readable stream.
pub type StreamSource = Pin<Box<dyn Stream<Item = StreamMessage>>>;

/// One message of a readable stream.
#[derive(Clone)]
pub enum StreamMessage {
    /// A chunk was enqueued.
    Next(JsValue),
    /// The stream errored; terminal.
    Error(JsValue),
    /// The stream closed normally; terminal.
    Close,
}

impl fmt::Debug for StreamMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(v) => write!(f, "Next({v:?})"),
            Self::Error(v) => write!(f, "Error({v:?})"),
            Self::Close => write!(f, "Close"),
        }
    }
}

/// Settlement state of a promise value.
pub enum PromiseState {
    /// Not yet settled. `Some` carries the future the async parser awaits;
    /// `None` marks a promise settled externally (streaming reconstruction).
    Pending(Option<PromiseFuture>),
    /// Fulfilled with a value.
    Resolved(JsValue),
    /// Rejected with a payload.
    Rejected(JsValue),
}

impl fmt::Debug for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(_) => write!(f, "Pending"),
            Self::Resolved(v) => write!(f, "Resolved({v:?})"),
            Self::Rejected(v) => write!(f, "Rejected({v:?})"),
        }
    }
}

/// Contents of a readable stream: an optional async source (input side) and
/// the events recorded so far (drained input, or output of reconstruction).
pub struct StreamContents {
    /// The async source, taken exactly once by the async parser.
    pub source: Option<StreamSource>,
    /// Recorded events, terminal message included.
    pub events: Vec<StreamMessage>,
}

impl fmt::Debug for StreamContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContents")
            .field("source", &self.source.as_ref().map(|_| "..."))
            .field("events", &self.events)
            .finish()
    }
}

/// The payload of a reference-typed value.
///
/// Fields are public: the model is a passive data description, the parser
/// and the evaluator are the two sides that interpret it.
pub enum ObjectKind {
    /// A plain object. `iterator` carries the drained iterable protocol of
    /// objects that expose one.
    Plain {
        /// True for `Object.create(null)` objects.
        proto_null: bool,
        /// Own enumerable properties in insertion order.
        props: Vec<(String, JsValue)>,
        /// Drained `Symbol.iterator` items, when the object is iterable.
        iterator: Option<Vec<JsValue>>,
        /// Integrity state.
        flag: ObjectFlag,
    },
    /// An array; `None` entries are holes. `items.len()` is the length.
    Array {
        /// Elements and holes.
        items: Vec<Option<JsValue>>,
        /// Integrity state.
        flag: ObjectFlag,
    },
    /// A `Date` by epoch milliseconds.
    Date {
        /// Milliseconds since the epoch.
        epoch_ms: f64,
    },
    /// A `RegExp`.
    RegExp {
        /// Pattern source.
        source: String,
        /// Flag letters.
        flags: String,
    },
    /// An `Error` or recognized subclass.
    Error {
        /// Which constructor.
        kind: ErrorKind,
        /// `message`.
        message: String,
        /// Other own enumerable properties (may include `stack`, `cause`).
        props: Vec<(String, JsValue)>,
    },
    /// An `AggregateError`.
    AggregateError {
        /// `message`.
        message: String,
        /// The aggregated errors.
        errors: Vec<JsValue>,
        /// Other own enumerable properties.
        props: Vec<(String, JsValue)>,
    },
    /// A boxed primitive.
    Boxed(JsValue),
    /// A raw byte buffer.
    ArrayBuffer {
        /// Buffer contents.
        bytes: Vec<u8>,
    },
    /// A typed-array or `DataView` view; `buffer` is an `ArrayBuffer` value
    /// shared by identity across sibling views.
    TypedArray {
        /// Which view constructor.
        kind: TypedArrayKind,
        /// The underlying buffer value.
        buffer: JsValue,
        /// View byte offset.
        byte_offset: u32,
        /// View length in elements (bytes for `DataView`).
        length: u32,
    },
    /// A `Map` with insertion-ordered entries.
    Map {
        /// Key/value entries.
        entries: Vec<(JsValue, JsValue)>,
    },
    /// A `Set` with insertion-ordered items.
    Set {
        /// Elements.
        items: Vec<JsValue>,
    },
    /// A promise.
    Promise(PromiseState),
    /// A readable stream.
    Stream(StreamContents),
    /// A `URL` by serialized href.
    Url {
        /// Serialized href.
        href: String,
    },
    /// A `URLSearchParams`.
    UrlSearchParams {
        /// Name/value pairs.
        pairs: Vec<(String, String)>,
    },
    /// A `Blob`; bytes are held eagerly, the async parser exposes them.
    Blob {
        /// MIME type.
        content_type: String,
        /// Body bytes.
        bytes: Vec<u8>,
    },
    /// A `File`.
    File {
        /// File name.
        name: String,
        /// MIME type.
        content_type: String,
        /// `lastModified` epoch milliseconds.
        last_modified: f64,
        /// Body bytes.
        bytes: Vec<u8>,
    },
    /// A `Headers` record.
    Headers {
        /// Name/value entries.
        entries: Vec<(String, String)>,
    },
    /// A `FormData` record; values are strings or `Blob`/`File` values.
    FormData {
        /// Name/value entries.
        entries: Vec<(String, JsValue)>,
    },
    /// A `Request`; the body, if any, is an `ArrayBuffer` value inside the
    /// init dictionary under `body`.
    Request {
        /// Request URL.
        url: String,
        /// Init dictionary (a plain object value).
        options: JsValue,
    },
    /// A `Response`.
    Response {
        /// Drained body buffer.
        body: Option<JsValue>,
        /// Init dictionary (a plain object value).
        options: JsValue,
    },
    /// An `Event`.
    Event {
        /// Event type string.
        name: String,
        /// Init dictionary (a plain object value).
        options: JsValue,
    },
    /// A `CustomEvent`.
    CustomEvent {
        /// Event type string.
        name: String,
        /// Init dictionary, `detail` included.
        options: JsValue,
    },
    /// A `DOMException`.
    DomException {
        /// Exception message.
        message: String,
        /// Exception name.
        name: String,
    },
    /// An opaque foreign handle; only meaningful through the reference
    /// registry or a plugin.
    Foreign(Rc<dyn Any>),
}

/// A heap object: one interior-mutable payload behind a shared pointer.
pub struct JsObject {
    kind: RefCell<ObjectKind>,
}

impl JsObject {
    /// Wraps a payload.
    pub fn new(kind: ObjectKind) -> Rc<Self> {
        Rc::new(Self {
            kind: RefCell::new(kind),
        })
    }

    /// Immutable view of the payload.
    pub fn kind(&self) -> Ref<'_, ObjectKind> {
        self.kind.borrow()
    }

    /// Mutable view of the payload.
    pub fn kind_mut(&self) -> RefMut<'_, ObjectKind> {
        self.kind.borrow_mut()
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cycles make a recursive Debug hang; print the kind name only.
        write!(f, "JsObject({})", self.kind.borrow().type_name())
    }
}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cycles make a field-by-field Debug hang; the kind name is enough
        // for diagnostics.
        write!(f, "ObjectKind::{}", self.type_name())
    }
}

impl ObjectKind {
    /// Host-side type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Plain { proto_null, .. } => {
                if *proto_null {
                    "null-prototype object"
                } else {
                    "object"
                }
            }
            Self::Array { .. } => "Array",
            Self::Date { .. } => "Date",
            Self::RegExp { .. } => "RegExp",
            Self::Error { .. } => "Error",
            Self::AggregateError { .. } => "AggregateError",
            Self::Boxed(_) => "boxed primitive",
            Self::ArrayBuffer { .. } => "ArrayBuffer",
            Self::TypedArray { kind, .. } => kind.constructor(),
            Self::Map { .. } => "Map",
            Self::Set { .. } => "Set",
            Self::Promise(_) => "Promise",
            Self::Stream(_) => "ReadableStream",
            Self::Url { .. } => "URL",
            Self::UrlSearchParams { .. } => "URLSearchParams",
            Self::Blob { .. } => "Blob",
            Self::File { .. } => "File",
            Self::Headers { .. } => "Headers",
            Self::FormData { .. } => "FormData",
            Self::Request { .. } => "Request",
            Self::Response { .. } => "Response",
            Self::Event { .. } => "Event",
            Self::CustomEvent { .. } => "CustomEvent",
            Self::DomException { .. } => "DOMException",
            Self::Foreign(_) => "foreign handle",
        }
    }
}

/// A value of the host environment.
#[derive(Clone, Debug)]
pub enum JsValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Bool(bool),
    /// A number (doubles; `-0`, infinities and `NaN` included).
    Number(f64),
    /// A bigint, decimal digits (optionally `-`-signed), no `n` suffix.
    BigInt(Rc<str>),
    /// A string.
    String(Rc<str>),
    /// A well-known symbol.
    Symbol(WellKnownSymbol),
    /// A reference type.
    Object(Rc<JsObject>),
}

impl JsValue {
    // --- CONSTRUCTORS ---

    /// A number value.
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// A string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Rc::from(s.into()))
    }

    /// A bigint value from its decimal spelling.
    pub fn bigint(digits: impl Into<String>) -> Self {
        Self::BigInt(Rc::from(digits.into()))
    }

    /// A plain object with the given properties.
    pub fn object(props: Vec<(impl Into<String>, JsValue)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Plain {
            proto_null: false,
            props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            iterator: None,
            flag: ObjectFlag::None,
        }))
    }

    /// A plain object with no properties.
    pub fn empty_object() -> Self {
        Self::object(Vec::<(String, JsValue)>::new())
    }

    /// A prototype-free object.
    pub fn null_proto_object(props: Vec<(impl Into<String>, JsValue)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Plain {
            proto_null: true,
            props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            iterator: None,
            flag: ObjectFlag::None,
        }))
    }

    /// A dense array.
    pub fn array(items: Vec<JsValue>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Array {
            items: items.into_iter().map(Some).collect(),
            flag: ObjectFlag::None,
        }))
    }

    /// An array with explicit holes.
    pub fn array_with_holes(items: Vec<Option<JsValue>>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Array {
            items,
            flag: ObjectFlag::None,
        }))
    }

    /// A `Date` from epoch milliseconds.
    pub fn date(epoch_ms: f64) -> Self {
        Self::Object(JsObject::new(ObjectKind::Date { epoch_ms }))
    }

    /// A `RegExp` from source and flags.
    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self::Object(JsObject::new(ObjectKind::RegExp {
            source: source.into(),
            flags: flags.into(),
        }))
    }

    /// An error value.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Error {
            kind,
            message: message.into(),
            props: Vec::new(),
        }))
    }

    /// An `AggregateError` value.
    pub fn aggregate_error(message: impl Into<String>, errors: Vec<JsValue>) -> Self {
        Self::Object(JsObject::new(ObjectKind::AggregateError {
            message: message.into(),
            errors,
            props: Vec::new(),
        }))
    }

    /// A boxed primitive.
    pub fn boxed(inner: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Boxed(inner)))
    }

    /// An `ArrayBuffer` over the given bytes.
    pub fn array_buffer(bytes: Vec<u8>) -> Self {
        Self::Object(JsObject::new(ObjectKind::ArrayBuffer { bytes }))
    }

    /// A typed-array view. `buffer` must be an `ArrayBuffer` value.
    pub fn typed_array(kind: TypedArrayKind, buffer: JsValue, byte_offset: u32, length: u32) -> Self {
        Self::Object(JsObject::new(ObjectKind::TypedArray {
            kind,
            buffer,
            byte_offset,
            length,
        }))
    }

    /// A `Map` with the given entries.
    pub fn map(entries: Vec<(JsValue, JsValue)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Map { entries }))
    }

    /// A `Set` with the given items.
    pub fn set(items: Vec<JsValue>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Set { items }))
    }

    /// An already-fulfilled promise.
    pub fn promise_resolved(value: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Promise(PromiseState::Resolved(
            value,
        ))))
    }

    /// An already-rejected promise.
    pub fn promise_rejected(payload: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Promise(PromiseState::Rejected(
            payload,
        ))))
    }

    /// A pending promise backed by a future.
    pub fn promise_pending(
        fut: impl Future<Output = std::result::Result<JsValue, JsValue>> + 'static,
    ) -> Self {
        Self::Object(JsObject::new(ObjectKind::Promise(PromiseState::Pending(
            Some(Box::pin(fut)),
        ))))
    }

    /// A readable stream backed by an async source.
    pub fn stream(source: StreamSource) -> Self {
        Self::Object(JsObject::new(ObjectKind::Stream(StreamContents {
            source: Some(source),
            events: Vec::new(),
        })))
    }

    /// A readable stream with pre-recorded events (test helper and
    /// reconstruction output).
    pub fn stream_recorded(events: Vec<StreamMessage>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Stream(StreamContents {
            source: None,
            events,
        })))
    }

    /// A `URL` by serialized href.
    pub fn url(href: impl Into<String>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Url { href: href.into() }))
    }

    /// A `URLSearchParams`.
    pub fn url_search_params(pairs: Vec<(impl Into<String>, impl Into<String>)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::UrlSearchParams {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }))
    }

    /// A `Blob`.
    pub fn blob(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Blob {
            content_type: content_type.into(),
            bytes,
        }))
    }

    /// A `File`.
    pub fn file(
        name: impl Into<String>,
        content_type: impl Into<String>,
        last_modified: f64,
        bytes: Vec<u8>,
    ) -> Self {
        Self::Object(JsObject::new(ObjectKind::File {
            name: name.into(),
            content_type: content_type.into(),
            last_modified,
            bytes,
        }))
    }

    /// A `Headers` record.
    pub fn headers(entries: Vec<(impl Into<String>, impl Into<String>)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Headers {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }))
    }

    /// A `FormData` record.
    pub fn form_data(entries: Vec<(impl Into<String>, JsValue)>) -> Self {
        Self::Object(JsObject::new(ObjectKind::FormData {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    /// A `Request`.
    pub fn request(url: impl Into<String>, options: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Request {
            url: url.into(),
            options,
        }))
    }

    /// A `Response`.
    pub fn response(body: Option<JsValue>, options: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Response { body, options }))
    }

    /// An `Event`.
    pub fn event(name: impl Into<String>, options: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::Event {
            name: name.into(),
            options,
        }))
    }

    /// A `CustomEvent`.
    pub fn custom_event(name: impl Into<String>, options: JsValue) -> Self {
        Self::Object(JsObject::new(ObjectKind::CustomEvent {
            name: name.into(),
            options,
        }))
    }

    /// A `DOMException`.
    pub fn dom_exception(message: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Object(JsObject::new(ObjectKind::DomException {
            message: message.into(),
            name: name.into(),
        }))
    }

    /// An opaque foreign handle for the reference registry or a plugin.
    pub fn foreign(handle: Rc<dyn Any>) -> Self {
        Self::Object(JsObject::new(ObjectKind::Foreign(handle)))
    }

    // --- INSPECTION ---

    /// The backing heap object, when the value is a reference type.
    pub fn as_object(&self) -> Option<&Rc<JsObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Identity key for reference types: the heap pointer.
    pub fn identity(&self) -> Option<usize> {
        self.as_object().map(|o| Rc::as_ptr(o) as usize)
    }

    /// True for reference types.
    pub fn is_reference_type(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Host-side type name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(o) => o.kind().type_name(),
        }
    }

    /// True when the value presents the iterable protocol; drives the
    /// two-pass property extraction.
    pub fn is_iterable(&self) -> bool {
        match self {
            Self::Object(o) => matches!(
                &*o.kind(),
                ObjectKind::Array { .. }
                    | ObjectKind::Map { .. }
                    | ObjectKind::Set { .. }
                    | ObjectKind::Plain {
                        iterator: Some(_),
                        ..
                    }
            ),
            _ => false,
        }
    }

    // --- MUTATION (cycle construction, evaluator output) ---

    /// Sets or replaces a property on a plain object. No-op on other kinds.
    pub fn set_prop(&self, key: impl Into<String>, value: JsValue) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Plain { props, .. } = &mut *o.kind_mut() {
                let key = key.into();
                if let Some(slot) = props.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                } else {
                    props.push((key, value));
                }
            }
        }
    }

    /// Installs the drained iterable protocol on a plain object.
    pub fn set_iterator(&self, items: Vec<JsValue>) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Plain { iterator, .. } = &mut *o.kind_mut() {
                *iterator = Some(items);
            }
        }
    }

    /// Writes an array element, growing with holes as needed.
    pub fn set_index(&self, index: usize, value: JsValue) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Array { items, .. } = &mut *o.kind_mut() {
                if items.len() <= index {
                    items.resize(index + 1, None);
                }
                items[index] = Some(value);
            }
        }
    }

    /// Appends a `Map` entry.
    pub fn map_set(&self, key: JsValue, value: JsValue) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Map { entries } = &mut *o.kind_mut() {
                entries.push((key, value));
            }
        }
    }

    /// Appends a `Set` element.
    pub fn set_add(&self, item: JsValue) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Set { items } = &mut *o.kind_mut() {
                items.push(item);
            }
        }
    }

    /// Appends a `FormData` entry.
    pub fn form_append(&self, key: impl Into<String>, value: JsValue) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::FormData { entries } = &mut *o.kind_mut() {
                entries.push((key.into(), value));
            }
        }
    }

    /// Sets the integrity flag on plain objects and arrays.
    pub fn set_flag(&self, new_flag: ObjectFlag) {
        if let Some(o) = self.as_object() {
            match &mut *o.kind_mut() {
                ObjectKind::Plain { flag, .. } | ObjectKind::Array { flag, .. } => {
                    *flag = new_flag;
                }
                _ => {}
            }
        }
    }

    /// Settles a promise from outside (streaming reconstruction).
    pub fn settle_promise(&self, outcome: std::result::Result<JsValue, JsValue>) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Promise(state) = &mut *o.kind_mut() {
                *state = match outcome {
                    Ok(v) => PromiseState::Resolved(v),
                    Err(v) => PromiseState::Rejected(v),
                };
            }
        }
    }

    /// Records a stream event from outside (streaming reconstruction).
    pub fn stream_push(&self, message: StreamMessage) {
        if let Some(o) = self.as_object() {
            if let ObjectKind::Stream(contents) = &mut *o.kind_mut() {
                contents.events.push(message);
            }
        }
    }
}

// --- STRUCTURAL EQUALITY (test support) ---

/// Cycle-aware structural equality.
///
/// Reference identity of repeated subvalues is not checked here (tests
/// assert it separately through [`JsValue::identity`]); two values are equal
/// when their graphs have the same shape and primitive payloads. `NaN`
/// equals `NaN`; `-0` does not equal `0`.
pub fn structurally_eq(a: &JsValue, b: &JsValue) -> bool {
    fn num_eq(x: f64, y: f64) -> bool {
        if x.is_nan() {
            return y.is_nan();
        }
        x == y && x.is_sign_negative() == y.is_sign_negative()
    }

    fn props_eq(
        a: &[(String, JsValue)],
        b: &[(String, JsValue)],
        seen: &mut Vec<(usize, usize)>,
    ) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|((ka, va), (kb, vb))| ka == kb && go(va, vb, seen))
    }

    fn go(a: &JsValue, b: &JsValue, seen: &mut Vec<(usize, usize)>) -> bool {
        match (a, b) {
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            (JsValue::Bool(x), JsValue::Bool(y)) => x == y,
            (JsValue::Number(x), JsValue::Number(y)) => num_eq(*x, *y),
            (JsValue::BigInt(x), JsValue::BigInt(y)) => x == y,
            (JsValue::String(x), JsValue::String(y)) => x == y,
            (JsValue::Symbol(x), JsValue::Symbol(y)) => x == y,
            (JsValue::Object(x), JsValue::Object(y)) => {
                let pair = (Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
                if pair.0 == pair.1 {
                    return true;
                }
                if seen.contains(&pair) {
                    // Both walks are inside the same pair of cycles.
                    return true;
                }
                seen.push(pair);
                let result = kinds_eq(&x.kind(), &y.kind(), seen);
                seen.pop();
                result
            }
            _ => false,
        }
    }

    fn kinds_eq(a: &ObjectKind, b: &ObjectKind, seen: &mut Vec<(usize, usize)>) -> bool {
        use ObjectKind::*;
        match (a, b) {
            (
                Plain {
                    proto_null: pa,
                    props: a_props,
                    iterator: ia,
                    flag: fa,
                },
                Plain {
                    proto_null: pb,
                    props: b_props,
                    iterator: ib,
                    flag: fb,
                },
            ) => {
                pa == pb
                    && fa == fb
                    && props_eq(a_props, b_props, seen)
                    && match (ia, ib) {
                        (None, None) => true,
                        (Some(x), Some(y)) => {
                            x.len() == y.len() && x.iter().zip(y).all(|(u, v)| go(u, v, seen))
                        }
                        _ => false,
                    }
            }
            (
                Array {
                    items: xa,
                    flag: fa,
                },
                Array {
                    items: xb,
                    flag: fb,
                },
            ) => {
                fa == fb
                    && xa.len() == xb.len()
                    && xa.iter().zip(xb).all(|(u, v)| match (u, v) {
                        (None, None) => true,
                        (Some(u), Some(v)) => go(u, v, seen),
                        _ => false,
                    })
            }
            (Date { epoch_ms: x }, Date { epoch_ms: y }) => num_eq(*x, *y),
            (
                RegExp {
                    source: sa,
                    flags: fa,
                },
                RegExp {
                    source: sb,
                    flags: fb,
                },
            ) => sa == sb && fa == fb,
            (
                Error {
                    kind: ka,
                    message: ma,
                    props: pa,
                },
                Error {
                    kind: kb,
                    message: mb,
                    props: pb,
                },
            ) => ka == kb && ma == mb && props_eq(pa, pb, seen),
            (
                AggregateError {
                    message: ma,
                    errors: ea,
                    props: pa,
                },
                AggregateError {
                    message: mb,
                    errors: eb,
                    props: pb,
                },
            ) => {
                ma == mb
                    && ea.len() == eb.len()
                    && ea.iter().zip(eb).all(|(u, v)| go(u, v, seen))
                    && props_eq(pa, pb, seen)
            }
            (Boxed(x), Boxed(y)) => go(x, y, seen),
            (ArrayBuffer { bytes: x }, ArrayBuffer { bytes: y }) => x == y,
            (
                TypedArray {
                    kind: ka,
                    buffer: ba,
                    byte_offset: oa,
                    length: la,
                },
                TypedArray {
                    kind: kb,
                    buffer: bb,
                    byte_offset: ob,
                    length: lb,
                },
            ) => ka == kb && oa == ob && la == lb && go(ba, bb, seen),
            (Map { entries: ea }, Map { entries: eb }) => {
                ea.len() == eb.len()
                    && ea
                        .iter()
                        .zip(eb)
                        .all(|((ka, va), (kb, vb))| go(ka, kb, seen) && go(va, vb, seen))
            }
            (Set { items: xa }, Set { items: xb }) => {
                xa.len() == xb.len() && xa.iter().zip(xb).all(|(u, v)| go(u, v, seen))
            }
            (Promise(x), Promise(y)) => match (x, y) {
                (PromiseState::Resolved(u), PromiseState::Resolved(v)) => go(u, v, seen),
                (PromiseState::Rejected(u), PromiseState::Rejected(v)) => go(u, v, seen),
                (PromiseState::Pending(_), PromiseState::Pending(_)) => true,
                _ => false,
            },
            (Stream(x), Stream(y)) => {
                x.events.len() == y.events.len()
                    && x.events.iter().zip(&y.events).all(|(u, v)| match (u, v) {
                        (StreamMessage::Next(a), StreamMessage::Next(b)) => go(a, b, seen),
                        (StreamMessage::Error(a), StreamMessage::Error(b)) => go(a, b, seen),
                        (StreamMessage::Close, StreamMessage::Close) => true,
                        _ => false,
                    })
            }
            (Url { href: x }, Url { href: y }) => x == y,
            (UrlSearchParams { pairs: x }, UrlSearchParams { pairs: y }) => x == y,
            (
                Blob {
                    content_type: ta,
                    bytes: ba,
                },
                Blob {
                    content_type: tb,
                    bytes: bb,
                },
            ) => ta == tb && ba == bb,
            (
                File {
                    name: na,
                    content_type: ta,
                    last_modified: la,
                    bytes: ba,
                },
                File {
                    name: nb,
                    content_type: tb,
                    last_modified: lb,
                    bytes: bb,
                },
            ) => na == nb && ta == tb && num_eq(*la, *lb) && ba == bb,
            (Headers { entries: x }, Headers { entries: y }) => x == y,
            (FormData { entries: ea }, FormData { entries: eb }) => {
                ea.len() == eb.len()
                    && ea
                        .iter()
                        .zip(eb)
                        .all(|((ka, va), (kb, vb))| ka == kb && go(va, vb, seen))
            }
            (
                Request {
                    url: ua,
                    options: oa,
                },
                Request {
                    url: ub,
                    options: ob,
                },
            ) => ua == ub && go(oa, ob, seen),
            (
                Response {
                    body: ba,
                    options: oa,
                },
                Response {
                    body: bb,
                    options: ob,
                },
            ) => {
                go(oa, ob, seen)
                    && match (ba, bb) {
                        (None, None) => true,
                        (Some(u), Some(v)) => go(u, v, seen),
                        _ => false,
                    }
            }
            (
                Event {
                    name: na,
                    options: oa,
                },
                Event {
                    name: nb,
                    options: ob,
                },
            )
            | (
                CustomEvent {
                    name: na,
                    options: oa,
                },
                CustomEvent {
                    name: nb,
                    options: ob,
                },
            ) => na == nb && go(oa, ob, seen),
            (
                DomException {
                    message: ma,
                    name: na,
                },
                DomException {
                    message: mb,
                    name: nb,
                },
            ) => ma == mb && na == nb,
            (Foreign(x), Foreign(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    go(a, b, &mut Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_pointer_identity() {
        let a = JsValue::empty_object();
        let b = a.clone();
        assert_eq!(a.identity(), b.identity());
        let c = JsValue::empty_object();
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn cycles_compare_without_hanging() {
        let a = JsValue::empty_object();
        a.set_prop("self", a.clone());
        let b = JsValue::empty_object();
        b.set_prop("self", b.clone());
        assert!(structurally_eq(&a, &b));
    }

    #[test]
    fn negative_zero_is_distinct() {
        assert!(!structurally_eq(&JsValue::number(0.0), &JsValue::number(-0.0)));
        assert!(structurally_eq(
            &JsValue::number(f64::NAN),
            &JsValue::number(f64::NAN)
        ));
    }

    #[test]
    fn holes_are_not_undefined() {
        let holes = JsValue::array_with_holes(vec![None, Some(JsValue::number(1.0))]);
        let dense = JsValue::array(vec![JsValue::Undefined, JsValue::number(1.0)]);
        assert!(!structurally_eq(&holes, &dense));
    }
}
