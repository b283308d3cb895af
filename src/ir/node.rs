use super::id::RefId;
use super::record::{ObjectFlag, ObjectRecord, PlainRecord};

/// The non-finite and sentinel constants with a dedicated literal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantValue {
    /// `true`
    True,
    /// `false`
    False,
    /// `undefined`, emitted as `void 0`.
    Undefined,
    /// `null`
    Null,
    /// Negative zero, emitted as `-0`.
    NegZero,
    /// Positive infinity, emitted as `1/0` so it survives JSON transport.
    Infinity,
    /// Negative infinity, emitted as `-1/0`.
    NegInfinity,
    /// Not-a-number, emitted as `0/0`.
    NaN,
}

impl ConstantValue {
    /// Stable numeric encoding used by the JSON IR (`s` field).
    pub fn as_u8(self) -> u8 {
        match self {
            Self::True => 0,
            Self::False => 1,
            Self::Undefined => 2,
            Self::Null => 3,
            Self::NegZero => 4,
            Self::Infinity => 5,
            Self::NegInfinity => 6,
            Self::NaN => 7,
        }
    }

    /// Decodes the JSON IR encoding.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::True),
            1 => Some(Self::False),
            2 => Some(Self::Undefined),
            3 => Some(Self::Null),
            4 => Some(Self::NegZero),
            5 => Some(Self::Infinity),
            6 => Some(Self::NegInfinity),
            7 => Some(Self::NaN),
            _ => None,
        }
    }
}

/// The recognized error constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `Error`
    Error,
    /// `EvalError`
    Eval,
    /// `RangeError`
    Range,
    /// `ReferenceError`
    Reference,
    /// `SyntaxError`
    Syntax,
    /// `TypeError`
    Type,
    /// `URIError`
    Uri,
}

impl ErrorKind {
    /// The constructor identifier as spelled in source.
    pub fn constructor(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Eval => "EvalError",
            Self::Range => "RangeError",
            Self::Reference => "ReferenceError",
            Self::Syntax => "SyntaxError",
            Self::Type => "TypeError",
            Self::Uri => "URIError",
        }
    }

    /// Resolves a constructor identifier back to a kind.
    pub fn from_constructor(name: &str) -> Option<Self> {
        match name {
            "Error" => Some(Self::Error),
            "EvalError" => Some(Self::Eval),
            "RangeError" => Some(Self::Range),
            "ReferenceError" => Some(Self::Reference),
            "SyntaxError" => Some(Self::Syntax),
            "TypeError" => Some(Self::Type),
            "URIError" => Some(Self::Uri),
            _ => None,
        }
    }
}

/// The recognized typed-array views over an `ArrayBuffer`.
///
/// `DataView` shares the `new C(buffer, byteOffset, length)` constructor
/// form, so it lives in the same enum; the JSON IR still gives it (and the
/// BigInt views) their own tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
    DataView,
}

impl TypedArrayKind {
    /// The constructor identifier as spelled in source.
    pub fn constructor(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
            Self::DataView => "DataView",
        }
    }

    /// Resolves a constructor identifier back to a kind.
    pub fn from_constructor(name: &str) -> Option<Self> {
        match name {
            "Int8Array" => Some(Self::Int8),
            "Uint8Array" => Some(Self::Uint8),
            "Uint8ClampedArray" => Some(Self::Uint8Clamped),
            "Int16Array" => Some(Self::Int16),
            "Uint16Array" => Some(Self::Uint16),
            "Int32Array" => Some(Self::Int32),
            "Uint32Array" => Some(Self::Uint32),
            "Float32Array" => Some(Self::Float32),
            "Float64Array" => Some(Self::Float64),
            "BigInt64Array" => Some(Self::BigInt64),
            "BigUint64Array" => Some(Self::BigUint64),
            "DataView" => Some(Self::DataView),
            _ => None,
        }
    }

    /// True for the views that require `Feature::BIGINT_TYPED_ARRAY`.
    pub fn is_big_int(self) -> bool {
        matches!(self, Self::BigInt64 | Self::BigUint64)
    }

    /// Bytes per element, used when a view is constructed without an
    /// explicit element count.
    pub fn bytes_per_element(self) -> u32 {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped | Self::DataView => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }
}

/// The enumerated well-known symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WellKnownSymbol {
    AsyncIterator,
    HasInstance,
    IsConcatSpreadable,
    Iterator,
    Match,
    MatchAll,
    Replace,
    Search,
    Species,
    Split,
    ToPrimitive,
    ToStringTag,
    Unscopables,
}

impl WellKnownSymbol {
    /// The source spelling, e.g. `Symbol.iterator`.
    pub fn source(self) -> &'static str {
        match self {
            Self::AsyncIterator => "Symbol.asyncIterator",
            Self::HasInstance => "Symbol.hasInstance",
            Self::IsConcatSpreadable => "Symbol.isConcatSpreadable",
            Self::Iterator => "Symbol.iterator",
            Self::Match => "Symbol.match",
            Self::MatchAll => "Symbol.matchAll",
            Self::Replace => "Symbol.replace",
            Self::Search => "Symbol.search",
            Self::Species => "Symbol.species",
            Self::Split => "Symbol.split",
            Self::ToPrimitive => "Symbol.toPrimitive",
            Self::ToStringTag => "Symbol.toStringTag",
            Self::Unscopables => "Symbol.unscopables",
        }
    }

    /// The property name under the `Symbol` namespace object.
    pub fn property(self) -> &'static str {
        // source() is always "Symbol." + property
        &self.source()[7..]
    }

    /// Stable numeric encoding used by the JSON IR (`s` field).
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AsyncIterator => 0,
            Self::HasInstance => 1,
            Self::IsConcatSpreadable => 2,
            Self::Iterator => 3,
            Self::Match => 4,
            Self::MatchAll => 5,
            Self::Replace => 6,
            Self::Search => 7,
            Self::Species => 8,
            Self::Split => 9,
            Self::ToPrimitive => 10,
            Self::ToStringTag => 11,
            Self::Unscopables => 12,
        }
    }

    /// Decodes the JSON IR encoding.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::AsyncIterator),
            1 => Some(Self::HasInstance),
            2 => Some(Self::IsConcatSpreadable),
            3 => Some(Self::Iterator),
            4 => Some(Self::Match),
            5 => Some(Self::MatchAll),
            6 => Some(Self::Replace),
            7 => Some(Self::Search),
            8 => Some(Self::Species),
            9 => Some(Self::Split),
            10 => Some(Self::ToPrimitive),
            11 => Some(Self::ToStringTag),
            12 => Some(Self::Unscopables),
            _ => None,
        }
    }

    /// Resolves a property name (`"iterator"`) back to the symbol.
    pub fn from_property(name: &str) -> Option<Self> {
        match name {
            "asyncIterator" => Some(Self::AsyncIterator),
            "hasInstance" => Some(Self::HasInstance),
            "isConcatSpreadable" => Some(Self::IsConcatSpreadable),
            "iterator" => Some(Self::Iterator),
            "match" => Some(Self::Match),
            "matchAll" => Some(Self::MatchAll),
            "replace" => Some(Self::Replace),
            "search" => Some(Self::Search),
            "species" => Some(Self::Species),
            "split" => Some(Self::Split),
            "toPrimitive" => Some(Self::ToPrimitive),
            "toStringTag" => Some(Self::ToStringTag),
            "unscopables" => Some(Self::Unscopables),
            _ => None,
        }
    }
}

/// One recorded event of an async-drained readable stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventNode {
    /// A chunk was enqueued.
    Enqueue(Node),
    /// The stream errored with the payload; terminal.
    Error(Node),
    /// The stream closed normally; terminal.
    Close,
}

/// A node of the intermediate tree.
///
/// Every serializable shape has exactly one variant; within one parse each
/// non-primitive value owns exactly one id-carrying node, and every repeated
/// occurrence is an `IndexedValue` referring back to that id.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A literal-form constant.
    Constant(ConstantValue),
    /// A finite, non-negative-zero number.
    Number(f64),
    /// A string payload, stored raw and escaped at emission.
    String(String),
    /// A bigint payload in decimal form, without the `n` suffix.
    BigInt(String),
    /// A back-reference to an id introduced earlier in the walk.
    IndexedValue(RefId),
    /// A value registered in the reference registry; rehydrated by tag.
    Reference {
        /// Assigned id.
        id: RefId,
        /// Registry tag, stored raw.
        tag: String,
    },
    /// An array, holes encoded as absent entries.
    Array {
        /// Assigned id.
        id: RefId,
        /// `length` of the source array (holes included).
        length: u32,
        /// Element nodes; `None` is a hole.
        items: Vec<Option<Node>>,
        /// Integrity state.
        flag: ObjectFlag,
    },
    /// A plain object.
    Object {
        /// Assigned id.
        id: RefId,
        /// Own properties.
        record: ObjectRecord,
        /// Integrity state.
        flag: ObjectFlag,
    },
    /// A prototype-free object (`Object.create(null)`).
    NullConstructor {
        /// Assigned id.
        id: RefId,
        /// Own properties.
        record: ObjectRecord,
        /// Integrity state.
        flag: ObjectFlag,
    },
    /// A `Date`, by epoch milliseconds.
    Date {
        /// Assigned id.
        id: RefId,
        /// Milliseconds since the epoch.
        epoch_ms: f64,
    },
    /// A `RegExp` literal.
    RegExp {
        /// Assigned id.
        id: RefId,
        /// Pattern source text.
        source: String,
        /// Flag letters.
        flags: String,
    },
    /// An `Error` or recognized subclass.
    Error {
        /// Assigned id.
        id: RefId,
        /// Which constructor.
        kind: ErrorKind,
        /// `message`, stored raw.
        message: String,
        /// Extra own properties reattached via the dictionary mechanism.
        options: Option<ObjectRecord>,
    },
    /// An `AggregateError` (distinct from ordinary errors).
    AggregateError {
        /// Assigned id.
        id: RefId,
        /// `message`, stored raw.
        message: String,
        /// Extra own properties, including `errors`.
        options: Option<ObjectRecord>,
    },
    /// A boxed primitive (`Object(inner)`).
    Boxed {
        /// Assigned id.
        id: RefId,
        /// The wrapped primitive node.
        inner: Box<Node>,
    },
    /// A raw byte buffer.
    ArrayBuffer {
        /// Assigned id.
        id: RefId,
        /// Buffer contents.
        bytes: Vec<u8>,
    },
    /// A typed-array or `DataView` view over a buffer node.
    TypedArray {
        /// Assigned id.
        id: RefId,
        /// Which view constructor.
        kind: TypedArrayKind,
        /// The underlying buffer (an `ArrayBuffer` node or an alias to one).
        buffer: Box<Node>,
        /// View byte offset.
        byte_offset: u32,
        /// View length in elements (bytes for `DataView`).
        length: u32,
    },
    /// A `Map`; parallel key/value node lists.
    Map {
        /// Assigned id.
        id: RefId,
        /// Entry keys in insertion order.
        keys: Vec<Node>,
        /// Entry values, index-parallel to `keys`.
        values: Vec<Node>,
    },
    /// A `Set`.
    Set {
        /// Assigned id.
        id: RefId,
        /// Elements in insertion order.
        items: Vec<Node>,
    },
    /// A settled promise.
    Promise {
        /// Assigned id.
        id: RefId,
        /// `true` for resolve, `false` for reject.
        resolved: bool,
        /// The settlement payload.
        value: Box<Node>,
    },
    /// A well-known symbol.
    WellKnownSymbol {
        /// Assigned id.
        id: RefId,
        /// Which symbol.
        symbol: WellKnownSymbol,
    },
    /// A plugin-claimed value; payload is plugin-defined JSON.
    Plugin {
        /// Assigned id.
        id: RefId,
        /// Plugin tag.
        tag: String,
        /// Opaque plugin payload.
        payload: serde_json::Value,
    },
    /// A `URL`.
    Url {
        /// Assigned id.
        id: RefId,
        /// Serialized href, stored raw.
        href: String,
    },
    /// A `URLSearchParams`.
    UrlSearchParams {
        /// Assigned id.
        id: RefId,
        /// Serialized query-string initializer, stored raw.
        init: String,
    },
    /// A `Blob` with its drained byte buffer.
    Blob {
        /// Assigned id.
        id: RefId,
        /// MIME type.
        content_type: String,
        /// The drained body (an `ArrayBuffer` node or alias).
        buffer: Box<Node>,
    },
    /// A `File` with its drained byte buffer.
    File {
        /// Assigned id.
        id: RefId,
        /// File name.
        name: String,
        /// MIME type.
        content_type: String,
        /// `lastModified` in epoch milliseconds.
        last_modified: f64,
        /// The drained body.
        buffer: Box<Node>,
    },
    /// A `Headers` record.
    Headers {
        /// Assigned id.
        id: RefId,
        /// Name/value entries.
        record: PlainRecord,
    },
    /// A `FormData` record.
    FormData {
        /// Assigned id.
        id: RefId,
        /// Name/value entries; values may be `File`/`Blob` nodes.
        record: PlainRecord,
    },
    /// A `Request` with a drained body folded into its init options.
    Request {
        /// Assigned id.
        id: RefId,
        /// Request URL, stored raw.
        url: String,
        /// Init dictionary (an `Object` node).
        options: Box<Node>,
    },
    /// A `Response` with a drained body.
    Response {
        /// Assigned id.
        id: RefId,
        /// Drained body buffer, when any.
        body: Option<Box<Node>>,
        /// Init dictionary (an `Object` node).
        options: Box<Node>,
    },
    /// An `Event`.
    Event {
        /// Assigned id.
        id: RefId,
        /// Event type string, stored raw.
        name: String,
        /// Init dictionary (an `Object` node).
        options: Box<Node>,
    },
    /// A `CustomEvent`.
    CustomEvent {
        /// Assigned id.
        id: RefId,
        /// Event type string, stored raw.
        name: String,
        /// Init dictionary, `detail` included.
        options: Box<Node>,
    },
    /// A `DOMException`.
    DomException {
        /// Assigned id.
        id: RefId,
        /// Exception message, stored raw.
        message: String,
        /// Exception name, stored raw.
        name: String,
    },
    /// A fully-drained readable stream (async parse, self-contained mode).
    ReadableStream {
        /// Assigned id.
        id: RefId,
        /// Recorded events, replayed from `start`.
        events: Vec<StreamEventNode>,
    },
    /// Streaming-only: a promise with externally-visible settle hooks.
    PromiseConstructor {
        /// Assigned id.
        id: RefId,
    },
    /// Streaming-only: resolve the promise at `id`.
    PromiseResolve {
        /// Id of the promise constructor.
        id: RefId,
        /// The settlement payload.
        value: Box<Node>,
    },
    /// Streaming-only: reject the promise at `id`.
    PromiseReject {
        /// Id of the promise constructor.
        id: RefId,
        /// The settlement payload.
        value: Box<Node>,
    },
    /// Streaming-only: a readable stream with externally-visible controller
    /// hooks.
    ReadableStreamConstructor {
        /// Assigned id.
        id: RefId,
    },
    /// Streaming-only: enqueue a chunk on the stream at `id`.
    ReadableStreamEnqueue {
        /// Id of the stream constructor.
        id: RefId,
        /// The chunk.
        value: Box<Node>,
    },
    /// Streaming-only: error the stream at `id`.
    ReadableStreamError {
        /// Id of the stream constructor.
        id: RefId,
        /// The error payload.
        value: Box<Node>,
    },
    /// Streaming-only: close the stream at `id`.
    ReadableStreamClose {
        /// Id of the stream constructor.
        id: RefId,
    },
}

impl Node {
    /// The id this node introduces, if any.
    ///
    /// `IndexedValue` and the streaming follow-ups refer to ids they do not
    /// introduce, so they return `None` here.
    pub fn own_id(&self) -> Option<RefId> {
        match self {
            Node::Reference { id, .. }
            | Node::Array { id, .. }
            | Node::Object { id, .. }
            | Node::NullConstructor { id, .. }
            | Node::Date { id, .. }
            | Node::RegExp { id, .. }
            | Node::Error { id, .. }
            | Node::AggregateError { id, .. }
            | Node::Boxed { id, .. }
            | Node::ArrayBuffer { id, .. }
            | Node::TypedArray { id, .. }
            | Node::Map { id, .. }
            | Node::Set { id, .. }
            | Node::Promise { id, .. }
            | Node::WellKnownSymbol { id, .. }
            | Node::Plugin { id, .. }
            | Node::Url { id, .. }
            | Node::UrlSearchParams { id, .. }
            | Node::Blob { id, .. }
            | Node::File { id, .. }
            | Node::Headers { id, .. }
            | Node::FormData { id, .. }
            | Node::Request { id, .. }
            | Node::Response { id, .. }
            | Node::Event { id, .. }
            | Node::CustomEvent { id, .. }
            | Node::DomException { id, .. }
            | Node::ReadableStream { id, .. }
            | Node::PromiseConstructor { id }
            | Node::ReadableStreamConstructor { id } => Some(*id),
            _ => None,
        }
    }
}
