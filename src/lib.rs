//! # Vivicode
//!
//! A graph-based, code-emitting serializer: it turns an in-memory
//! JavaScript-like value graph into a self-contained source expression that,
//! evaluated in a compatible host, rebuilds a structurally and referentially
//! equivalent graph — cycles, deduplicated aliases, promises, binary buffers
//! and web-platform objects included.
//!
//! ## Overview
//!
//! Vivicode is fundamentally different from data serializers. Instead of
//! producing a passive document, it produces *code*: the output uses the
//! target runtime's own constructors to rebuild the graph, so anything with
//! a constructor form survives the trip — including shapes JSON cannot
//! carry (cycles, `Map`/`Set`, typed arrays, `undefined`, `-0`, holes).
//!
//! ### Key Features
//!
//! *   **Two-phase pipeline:** a parse phase walks the input, assigns stable
//!     reference ids, detects aliases and cycles, and produces a typed node
//!     tree; a serialize phase turns the tree into source text.
//! *   **Cycle preservation:** in-progress ids are tracked on a stack;
//!     references into the stack become post-construction assignments, so
//!     `a.self = a` round-trips by identity.
//! *   **Sync and async parsing:** the sync entry points reject
//!     promise-bearing values; the async ones await promises and drain
//!     readable streams.
//! *   **Compatibility matrix:** a bitset of permitted target idioms; every
//!     emission with an older spelling consults it (`=>` vs `function`,
//!     `Object.assign` vs per-property writes, ...).
//! *   **Two operating modes:** *self-contained* (one IIFE, private
//!     bindings) and *cross-referenced* (expressions share the
//!     process-global table `$R`, with an incremental streaming sub-mode).
//! *   **JSON IR:** every graph also has a JSON-safe tree form that can be
//!     re-emitted (`compile_json`) or rebuilt directly (`from_json`).
//! *   **Built-in deserializer:** `deserialize` evaluates the emitted
//!     subset and rebuilds the graph, so round trips are testable without a
//!     JS host.
//!
//! ## Usage
//!
//! ```rust
//! use vivicode::{deserialize, serialize, structurally_eq, JsValue};
//!
//! let obj = JsValue::empty_object();
//! obj.set_prop("answer", JsValue::number(42.0));
//! obj.set_prop("self", obj.clone());
//!
//! let source = serialize(&obj)?;
//! let back = deserialize(&source)?;
//! assert!(structurally_eq(&obj, &back));
//! # Ok::<(), vivicode::VivicodeError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **No unsafe, no panics:** enforced by crate lints; every failure is a
//!   [`VivicodeError`].
//! * **Single-threaded cooperative:** values are `Rc`-based and the
//!   streaming driver only progresses while the caller drives it; nothing
//!   runs on background threads.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod error;
pub mod escape;
pub mod features;
pub mod ir;
pub mod json;
pub mod plugin;
pub mod registry;
pub mod stream;
pub mod value;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod eval;
#[doc(hidden)]
pub mod parse;
#[doc(hidden)]
pub mod serializer;

// --- RE-EXPORTS ---

pub use api::{
    compile_json, create_reference, cross_serialize, cross_serialize_async,
    cross_serialize_stream, deserialize, from_json, serialize, serialize_async, to_json,
    to_json_async, CrossOptions, Vivicode,
};
pub use error::{Result, VivicodeError};
pub use eval::Evaluator;
pub use features::Feature;
pub use ir::{ErrorKind, Node, ObjectFlag, RefId, TypedArrayKind, WellKnownSymbol};
pub use json::{JsonNode, JsonRecord};
pub use plugin::{Plugin, PluginRegistry};
pub use registry::{process_registry, ReferenceRegistry};
pub use stream::{StreamCallbacks, StreamHandle, StreamWriter};
pub use value::{
    structurally_eq, JsObject, JsValue, ObjectKind, PromiseState, StreamContents, StreamMessage,
};

/// Constants used throughout the library.
pub mod constants {
    /// The process-global reference table the cross mode binds into.
    pub const CROSS_REFERENCE_TABLE: &str = "$R";
    /// The global map registered references are looked up in.
    pub const REFERENCE_MAP: &str = "$REFS";
}
