//! The serialize phase: IR → source text.
//!
//! The base serializer implements all structural emission (containers, cycle
//! patching, assignment deferral, array holes, iterables, typed arrays,
//! Map/Set entries, error construction, plugin dispatch); the two schemes
//! supply the reference naming and binding strategy:
//!
//! - [`contained::ContainedScheme`] — private base-54 names wrapped in an
//!   IIFE; one self-contained expression per call.
//! - [`cross::CrossScheme`] — every id binds into the process-shared table
//!   `$R`, optionally namespaced by a scope id.
//!
//! Temporal dead zones from cycles are handled with the stack/mark/deferred
//! machinery: the stack of in-progress ids is the sole witness of a live
//! cycle, on-stack references move to post-construction assignments, and the
//! one-shot deferred map lets a definition be emitted at its first safe
//! reference site.

/// The self-contained scheme.
pub mod contained;
/// The cross-referenced scheme.
pub mod cross;

use std::collections::HashSet;

use crate::error::{Result, VivicodeError};
use crate::escape::quote;
use crate::features::Feature;
use crate::ir::{
    ConstantValue, ErrorKind, Node, ObjectFlag, ObjectRecord, PlainRecord, PropKey, RefId,
    StreamEventNode,
};
use crate::plugin::PluginRegistry;

/// Reference naming and binding strategy of a serializer mode.
pub(crate) trait Scheme {
    /// A stable short identifier for `id`; records that the id needs a name.
    fn ref_param(&mut self, core: &mut CoreState, id: RefId) -> String;

    /// Binds `expr` to `id` per the mode's strategy (`name=expr`, table
    /// write, or `expr` untouched when no binding is needed).
    fn assign(&mut self, core: &mut CoreState, id: RefId, expr: String) -> String;

    /// Wraps the finished body (and resolved patches) into the final
    /// expression.
    fn finish(&mut self, core: &mut CoreState, root: &Node, body: String, patches: String)
        -> String;
}

/// State shared by the base serializer and the schemes.
pub(crate) struct CoreState {
    /// Enabled feature matrix.
    pub features: Feature,
    /// Plugins for `Plugin` node emission.
    pub plugins: PluginRegistry,
    /// Ids that must be bound to a named slot.
    pub marked: HashSet<u32>,
    /// Ids currently under expansion; the cycle witness.
    pub stack: Vec<u32>,
    /// Pending post-construction assignments, already rendered.
    pub patches: Vec<String>,
    /// Pending integrity-flag applications, applied after all patches.
    pub flags: Vec<(ObjectFlag, RefId)>,
    /// One-shot map of emitted definitions awaiting their first reference
    /// site (insertion order preserved).
    pub deferred: Vec<(u32, String)>,
}

impl CoreState {
    fn new(features: Feature, plugins: PluginRegistry) -> Self {
        Self {
            features,
            plugins,
            marked: HashSet::new(),
            stack: Vec::new(),
            patches: Vec::new(),
            flags: Vec::new(),
            deferred: Vec::new(),
        }
    }

    fn require(&self, needed: Feature, name: &'static str) -> Result<()> {
        if self.features.has(needed) {
            Ok(())
        } else {
            Err(VivicodeError::FeatureDisabled(name))
        }
    }

    fn arrows(&self) -> bool {
        self.features.has(Feature::ARROW_FUNCTION)
    }
}

/// One property of an object-like literal, kept symbolic until the caller
/// decides between literal rendering and per-property assignment.
enum PropPiece {
    /// `key: value`
    Pair(String, String),
    /// Iterator installation; the string is the iterator expression the
    /// wrapper function must return.
    Iterator(String),
}

/// The base serializer, parameterized by scheme.
pub(crate) struct Serializer<S: Scheme> {
    core: CoreState,
    scheme: S,
}

impl<S: Scheme> Serializer<S> {
    pub fn new(features: Feature, plugins: PluginRegistry, scheme: S) -> Self {
        Self {
            core: CoreState::new(features, plugins),
            scheme,
        }
    }

    /// Serializes a whole tree into one expression.
    pub fn serialize_top(&mut self, node: &Node) -> Result<String> {
        scan_marks(node, &mut self.core.marked);
        let body = self.serialize(node)?;
        let patches = self.resolve_patches();
        Ok(self.scheme.finish(&mut self.core, node, body, patches))
    }

    /// Drains leftover deferred definitions, assignments and integrity
    /// flags into one comma-joined patch string. Deferred definitions go
    /// first (assignments reference them), flags last (integrity is applied
    /// after every mutation).
    fn resolve_patches(&mut self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (_, def) in self.core.deferred.drain(..) {
            parts.push(def);
        }
        parts.extend(self.core.patches.drain(..));
        let pending_flags: Vec<(ObjectFlag, RefId)> = self.core.flags.drain(..).collect();
        for (flag, id) in pending_flags {
            let target = self.scheme.ref_param(&mut self.core, id);
            let applied = match flag {
                ObjectFlag::Sealed => format!("Object.seal({target})"),
                ObjectFlag::Frozen => format!("Object.freeze({target})"),
                ObjectFlag::NonExtensible => format!("Object.preventExtensions({target})"),
                ObjectFlag::None => continue,
            };
            parts.push(applied);
        }
        parts.join(",")
    }

    fn ref_param(&mut self, id: RefId) -> String {
        self.scheme.ref_param(&mut self.core, id)
    }

    fn assign(&mut self, id: RefId, expr: String) -> String {
        self.scheme.assign(&mut self.core, id, expr)
    }

    fn push_flag(&mut self, flag: ObjectFlag, id: RefId) {
        if flag != ObjectFlag::None {
            // Mark before the node's own binding is rendered so the slot
            // gets a name.
            self.scheme.ref_param(&mut self.core, id);
            self.core.flags.push((flag, id));
        }
    }

    fn on_stack(&self, node: &Node) -> Option<RefId> {
        match node {
            Node::IndexedValue(id) if self.core.stack.contains(&id.as_u32()) => Some(*id),
            _ => None,
        }
    }

    /// Serializes one node. Never fails on IR the parser produced; plugin
    /// and malformed-IR errors surface immediately.
    pub fn serialize(&mut self, node: &Node) -> Result<String> {
        match node {
            Node::Constant(c) => Ok(constant_literal(*c).to_string()),
            Node::Number(n) => Ok(format_number(*n)),
            Node::String(s) => Ok(quote(s)),
            Node::BigInt(digits) => {
                self.core.require(Feature::BIGINT, "BigInt")?;
                Ok(format!("{digits}n"))
            }
            Node::IndexedValue(id) => {
                // A deferred definition is consumed at its first reference
                // site so it evaluates before anything that needs it.
                if let Some(pos) = self
                    .core
                    .deferred
                    .iter()
                    .position(|(deferred_id, _)| *deferred_id == id.as_u32())
                {
                    let (_, def) = self.core.deferred.remove(pos);
                    return Ok(format!("({def})"));
                }
                Ok(self.ref_param(*id))
            }
            Node::Reference { id, tag } => {
                let expr = format!("self.$REFS[{}]", quote(tag));
                Ok(self.assign(*id, expr))
            }
            Node::Array {
                id,
                length: _,
                items,
                flag,
            } => self.serialize_array(*id, items, *flag),
            Node::Object { id, record, flag } => {
                self.core.stack.push(id.as_u32());
                let pieces = self.serialize_props(*id, record)?;
                self.core.stack.pop();
                let expr = format!("{{{}}}", self.render_literal_props(&pieces));
                self.push_flag(*flag, *id);
                Ok(self.assign(*id, expr))
            }
            Node::NullConstructor { id, record, flag } => {
                self.core.stack.push(id.as_u32());
                let pieces = self.serialize_props(*id, record)?;
                self.core.stack.pop();
                let expr = self.attach_dictionary(*id, "Object.create(null)".into(), &pieces);
                self.push_flag(*flag, *id);
                Ok(self.assign(*id, expr))
            }
            Node::Date { id, epoch_ms } => {
                let expr = format!("new Date({})", format_number(*epoch_ms));
                Ok(self.assign(*id, expr))
            }
            Node::RegExp { id, source, flags } => {
                let source = if source.is_empty() {
                    "(?:)"
                } else {
                    source.as_str()
                };
                let expr = format!("/{source}/{flags}");
                Ok(self.assign(*id, expr))
            }
            Node::Error {
                id,
                kind,
                message,
                options,
            } => self.serialize_error(*id, *kind, message, options.as_ref()),
            Node::AggregateError {
                id,
                message,
                options,
            } => {
                if self.core.features.has(Feature::AGGREGATE_ERROR) {
                    let base = format!("new AggregateError([],{})", quote(message));
                    self.serialize_error_base(*id, base, options.as_ref())
                } else {
                    // Same downgrade the parser applies; keeps compileJSON
                    // symmetric.
                    self.serialize_error(*id, ErrorKind::Error, message, options.as_ref())
                }
            }
            Node::Boxed { id, inner } => {
                let inner = self.serialize(inner)?;
                Ok(self.assign(*id, format!("Object({inner})")))
            }
            Node::ArrayBuffer { id, bytes } => {
                self.core.require(Feature::TYPED_ARRAY, "ArrayBuffer")?;
                let list = bytes
                    .iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                Ok(self.assign(*id, format!("new Uint8Array([{list}]).buffer")))
            }
            Node::TypedArray {
                id,
                kind,
                buffer,
                byte_offset,
                length,
            } => {
                self.core.require(Feature::TYPED_ARRAY, kind.constructor())?;
                if kind.is_big_int() {
                    self.core
                        .require(Feature::BIGINT_TYPED_ARRAY, kind.constructor())?;
                }
                let buffer = self.serialize(buffer)?;
                let expr = format!(
                    "new {}({buffer},{byte_offset},{length})",
                    kind.constructor()
                );
                Ok(self.assign(*id, expr))
            }
            Node::Map { id, keys, values } => self.serialize_map(*id, keys, values),
            Node::Set { id, items } => self.serialize_set(*id, items),
            Node::Promise {
                id,
                resolved,
                value,
            } => self.serialize_promise(*id, *resolved, value),
            Node::WellKnownSymbol { id, symbol } => {
                self.core.require(Feature::SYMBOL, "Symbol")?;
                Ok(self.assign(*id, symbol.source().to_string()))
            }
            Node::Plugin { id, tag, payload } => {
                let expr = {
                    let plugin = self.core.plugins.find_by_tag(tag)?;
                    plugin.serialize(payload)?
                };
                Ok(self.assign(*id, expr))
            }
            Node::Url { id, href } => {
                self.core.require(Feature::WEB_API, "URL")?;
                Ok(self.assign(*id, format!("new URL({})", quote(href))))
            }
            Node::UrlSearchParams { id, init } => {
                self.core.require(Feature::WEB_API, "URLSearchParams")?;
                Ok(self.assign(*id, format!("new URLSearchParams({})", quote(init))))
            }
            Node::Blob {
                id,
                content_type,
                buffer,
            } => {
                self.core.require(Feature::WEB_API, "Blob")?;
                let buffer = self.serialize(buffer)?;
                let expr = format!("new Blob([{buffer}],{{type:{}}})", quote(content_type));
                Ok(self.assign(*id, expr))
            }
            Node::File {
                id,
                name,
                content_type,
                last_modified,
                buffer,
            } => {
                self.core.require(Feature::WEB_API, "File")?;
                let buffer = self.serialize(buffer)?;
                let expr = format!(
                    "new File([{buffer}],{},{{type:{},lastModified:{}}})",
                    quote(name),
                    quote(content_type),
                    format_number(*last_modified)
                );
                Ok(self.assign(*id, expr))
            }
            Node::Headers { id, record } => {
                self.core.require(Feature::WEB_API, "Headers")?;
                let entries = self.serialize_plain_entries(record)?;
                Ok(self.assign(*id, format!("new Headers([{entries}])")))
            }
            Node::FormData { id, record } => self.serialize_form_data(*id, record),
            Node::Request { id, url, options } => {
                self.core.require(Feature::WEB_API, "Request")?;
                let options = self.serialize(options)?;
                let expr = format!("new Request({},{options})", quote(url));
                Ok(self.assign(*id, expr))
            }
            Node::Response { id, body, options } => {
                self.core.require(Feature::WEB_API, "Response")?;
                let body = match body {
                    Some(b) => self.serialize(b)?,
                    None => "null".into(),
                };
                let options = self.serialize(options)?;
                Ok(self.assign(*id, format!("new Response({body},{options})")))
            }
            Node::Event { id, name, options } => {
                self.core.require(Feature::WEB_API, "Event")?;
                let options = self.serialize(options)?;
                let expr = format!("new Event({},{options})", quote(name));
                Ok(self.assign(*id, expr))
            }
            Node::CustomEvent { id, name, options } => {
                self.core.require(Feature::WEB_API, "CustomEvent")?;
                let options = self.serialize(options)?;
                let expr = format!("new CustomEvent({},{options})", quote(name));
                Ok(self.assign(*id, expr))
            }
            Node::DomException { id, message, name } => {
                self.core.require(Feature::WEB_API, "DOMException")?;
                let expr = format!("new DOMException({},{})", quote(message), quote(name));
                Ok(self.assign(*id, expr))
            }
            Node::ReadableStream { id, events } => self.serialize_stream(*id, events),
            Node::PromiseConstructor { id } => {
                self.core.require(Feature::PROMISE, "Promise")?;
                let ctor = if self.core.arrows() {
                    "((s,f,p)=>(p=new Promise((a,b)=>(s=a,f=b)),p.s=s,p.f=f,p))()"
                } else {
                    "(function(s,f,p){p=new Promise(function(a,b){s=a;f=b});p.s=s;p.f=f;return p})()"
                };
                Ok(self.assign(*id, ctor.to_string()))
            }
            Node::PromiseResolve { id, value } => {
                let value = self.serialize(value)?;
                let target = self.ref_param(*id);
                Ok(format!("{target}.s({value})"))
            }
            Node::PromiseReject { id, value } => {
                let value = self.serialize(value)?;
                let target = self.ref_param(*id);
                Ok(format!("{target}.f({value})"))
            }
            Node::ReadableStreamConstructor { id } => {
                self.core.require(Feature::WEB_API, "ReadableStream")?;
                let ctor = if self.core.arrows() {
                    "((c,s)=>(s=new ReadableStream({start:x=>(c=x)}),s.e=v=>c.enqueue(v),s.r=v=>c.error(v),s.c=()=>c.close(),s))()"
                } else {
                    "(function(c,s){s=new ReadableStream({start:function(x){c=x}});s.e=function(v){c.enqueue(v)};s.r=function(v){c.error(v)};s.c=function(){c.close()};return s})()"
                };
                Ok(self.assign(*id, ctor.to_string()))
            }
            Node::ReadableStreamEnqueue { id, value } => {
                let value = self.serialize(value)?;
                let target = self.ref_param(*id);
                Ok(format!("{target}.e({value})"))
            }
            Node::ReadableStreamError { id, value } => {
                let value = self.serialize(value)?;
                let target = self.ref_param(*id);
                Ok(format!("{target}.r({value})"))
            }
            Node::ReadableStreamClose { id } => {
                let target = self.ref_param(*id);
                Ok(format!("{target}.c()"))
            }
        }
    }

    // --- CONTAINERS ---

    fn serialize_array(
        &mut self,
        id: RefId,
        items: &[Option<Node>],
        flag: ObjectFlag,
    ) -> Result<String> {
        self.core.stack.push(id.as_u32());
        let mut parts = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let part = match item {
                None => String::new(),
                Some(child) => {
                    if let Some(cycle) = self.on_stack(child) {
                        // Empty slot now, patched assignment later.
                        let target = self.ref_param(id);
                        let value = self.ref_param(cycle);
                        self.core.patches.push(format!("{target}[{index}]={value}"));
                        String::new()
                    } else {
                        self.serialize(child)?
                    }
                }
            };
            parts.push(part);
        }
        self.core.stack.pop();

        let mut body = parts.join(",");
        // A trailing hole needs one extra comma to preserve length.
        if parts.last().is_some_and(String::is_empty) {
            body.push(',');
        }
        let expr = format!("[{body}]");
        self.push_flag(flag, id);
        Ok(self.assign(id, expr))
    }

    /// Serializes an object record; on-stack references become patches, the
    /// rest come back as symbolic property pieces.
    fn serialize_props(&mut self, owner: RefId, record: &ObjectRecord) -> Result<Vec<PropPiece>> {
        let mut pieces = Vec::with_capacity(record.len());
        for (key, value) in record.keys.iter().zip(&record.values) {
            match key {
                PropKey::String(k) => {
                    if let Some(cycle) = self.on_stack(value) {
                        let target = self.ref_param(owner);
                        let accessor = render_key_accessor(k);
                        let value = self.ref_param(cycle);
                        self.core
                            .patches
                            .push(format!("{target}{accessor}={value}"));
                    } else {
                        let value = self.serialize(value)?;
                        pieces.push(PropPiece::Pair(render_key_literal(k), value));
                    }
                }
                PropKey::SymbolIterator => {
                    self.core.require(Feature::SYMBOL, "Symbol")?;
                    let array = self.serialize(value)?;
                    pieces.push(PropPiece::Iterator(self.iterator_expr(&array)));
                }
            }
        }
        Ok(pieces)
    }

    /// The iterator expression over a materialized array expression, picked
    /// by the feature matrix.
    fn iterator_expr(&self, array: &str) -> String {
        if self.core.features.has(Feature::ARRAY_PROTOTYPE_VALUES) {
            format!("({array}).values()")
        } else if self.core.arrows() {
            format!("((a,i)=>({{next:()=>({{done:i>=a.length,value:a[i++]}})}}))({array},0)")
        } else {
            format!(
                "(function(a,i){{return{{next:function(){{return{{done:i>=a.length,value:a[i++]}}}}}}}})({array},0)"
            )
        }
    }

    fn render_literal_props(&self, pieces: &[PropPiece]) -> String {
        let features = self.core.features;
        pieces
            .iter()
            .map(|piece| match piece {
                PropPiece::Pair(key, value) => format!("{key}:{value}"),
                PropPiece::Iterator(iter) => {
                    if features.has(Feature::METHOD_SHORTHAND) {
                        format!("[Symbol.iterator](){{return {iter}}}")
                    } else if features.has(Feature::ARROW_FUNCTION) {
                        format!("[Symbol.iterator]:()=>{iter}")
                    } else {
                        format!("[Symbol.iterator]:function(){{return {iter}}}")
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Attaches a property dictionary to a non-literal base expression:
    /// one `Object.assign` call, or individual assignments when the matrix
    /// forbids it.
    fn attach_dictionary(&mut self, id: RefId, base: String, pieces: &[PropPiece]) -> String {
        if pieces.is_empty() {
            return base;
        }
        if self.core.features.has(Feature::OBJECT_ASSIGN) {
            let literal = self.render_literal_props(pieces);
            return format!("Object.assign({base},{{{literal}}})");
        }
        // Sequence form binds the slot first, then assigns one by one.
        let name = self.ref_param(id);
        let mut parts = vec![format!("{name}={base}")];
        for piece in pieces {
            match piece {
                PropPiece::Pair(key, value) => {
                    let accessor = literal_key_to_accessor(key);
                    parts.push(format!("{name}{accessor}={value}"));
                }
                PropPiece::Iterator(iter) => {
                    let function = if self.core.arrows() {
                        format!("()=>{iter}")
                    } else {
                        format!("function(){{return {iter}}}")
                    };
                    parts.push(format!("{name}[Symbol.iterator]={function}"));
                }
            }
        }
        parts.push(name);
        format!("({})", parts.join(","))
    }

    fn serialize_map(&mut self, id: RefId, keys: &[Node], values: &[Node]) -> Result<String> {
        self.core.require(Feature::MAP, "Map")?;
        self.core.stack.push(id.as_u32());
        let mut entries = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let key_cycle = self.on_stack(key);
            let value_cycle = self.on_stack(value);
            match (key_cycle, value_cycle) {
                (None, None) => {
                    let key = self.serialize(key)?;
                    let value = self.serialize(value)?;
                    entries.push(format!("[{key},{value}]"));
                }
                (Some(k), Some(v)) => {
                    let target = self.ref_param(id);
                    let key = self.ref_param(k);
                    let value = self.ref_param(v);
                    self.core.patches.push(format!("{target}.set({key},{value})"));
                }
                (Some(k), None) => {
                    let target = self.ref_param(id);
                    let key = self.ref_param(k);
                    let value = self.defer_entry_side(value)?;
                    self.core.patches.push(format!("{target}.set({key},{value})"));
                }
                (None, Some(v)) => {
                    let target = self.ref_param(id);
                    let key = self.defer_entry_side(key)?;
                    let value = self.ref_param(v);
                    self.core.patches.push(format!("{target}.set({key},{value})"));
                }
            }
        }
        self.core.stack.pop();
        let expr = format!("new Map([{}])", entries.join(","));
        Ok(self.assign(id, expr))
    }

    /// The Map defer rule: when one entry side is on the stack and the
    /// other is a marked definition whose binding has not been emitted yet,
    /// the definition goes into the deferred slot (so the first structural
    /// reference site evaluates it) and the setter uses the bound name.
    /// Unmarked definitions inline into the setter directly.
    fn defer_entry_side(&mut self, side: &Node) -> Result<String> {
        if let Some(side_id) = side.own_id() {
            if self.core.marked.contains(&side_id.as_u32()) {
                let definition = self.serialize(side)?;
                self.core.deferred.push((side_id.as_u32(), definition));
                return Ok(self.ref_param(side_id));
            }
        }
        self.serialize(side)
    }

    fn serialize_set(&mut self, id: RefId, items: &[Node]) -> Result<String> {
        self.core.require(Feature::SET, "Set")?;
        self.core.stack.push(id.as_u32());
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            if let Some(cycle) = self.on_stack(item) {
                let target = self.ref_param(id);
                let value = self.ref_param(cycle);
                self.core.patches.push(format!("{target}.add({value})"));
            } else {
                parts.push(self.serialize(item)?);
            }
        }
        self.core.stack.pop();
        let expr = format!("new Set([{}])", parts.join(","));
        Ok(self.assign(id, expr))
    }

    fn serialize_promise(&mut self, id: RefId, resolved: bool, value: &Node) -> Result<String> {
        self.core.require(Feature::PROMISE, "Promise")?;
        self.core.stack.push(id.as_u32());
        let expr = if let Some(cycle) = self.on_stack(value) {
            // The payload is not bound yet; a thunk keeps the returned
            // promise evaluable before the reference is.
            let reference = self.ref_param(cycle);
            let body = if resolved {
                reference
            } else {
                format!("Promise.reject({reference})")
            };
            let thunk = if self.core.arrows() {
                format!("()=>{body}")
            } else {
                format!("function(){{return {body}}}")
            };
            format!("Promise.resolve().then({thunk})")
        } else {
            let value = self.serialize(value)?;
            if resolved {
                format!("Promise.resolve({value})")
            } else {
                format!("Promise.reject({value})")
            }
        };
        self.core.stack.pop();
        Ok(self.assign(id, expr))
    }

    fn serialize_error(
        &mut self,
        id: RefId,
        kind: ErrorKind,
        message: &str,
        options: Option<&ObjectRecord>,
    ) -> Result<String> {
        let base = format!("new {}({})", kind.constructor(), quote(message));
        self.serialize_error_base(id, base, options)
    }

    fn serialize_error_base(
        &mut self,
        id: RefId,
        base: String,
        options: Option<&ObjectRecord>,
    ) -> Result<String> {
        let expr = match options {
            None => base,
            Some(record) => {
                self.core.stack.push(id.as_u32());
                let pieces = self.serialize_props(id, record)?;
                self.core.stack.pop();
                self.attach_dictionary(id, base, &pieces)
            }
        };
        Ok(self.assign(id, expr))
    }

    fn serialize_plain_entries(&mut self, record: &PlainRecord) -> Result<String> {
        let mut parts = Vec::with_capacity(record.len());
        for (key, value) in record.keys.iter().zip(&record.values) {
            let value = self.serialize(value)?;
            parts.push(format!("[{},{value}]", quote(key)));
        }
        Ok(parts.join(","))
    }

    fn serialize_form_data(&mut self, id: RefId, record: &PlainRecord) -> Result<String> {
        self.core.require(Feature::WEB_API, "FormData")?;
        if record.is_empty() {
            return Ok(self.assign(id, "new FormData()".into()));
        }
        // The append calls need the instance, so this arm does its own
        // binding instead of going through `assign`.
        let name = self.ref_param(id);
        let base = self.assign(id, "new FormData()".into());
        let mut parts = vec![base];
        for (key, value) in record.keys.iter().zip(&record.values) {
            let value = self.serialize(value)?;
            parts.push(format!("{name}.append({},{value})", quote(key)));
        }
        parts.push(name);
        Ok(format!("({})", parts.join(",")))
    }

    fn serialize_stream(&mut self, id: RefId, events: &[StreamEventNode]) -> Result<String> {
        self.core.require(Feature::WEB_API, "ReadableStream")?;
        self.core.stack.push(id.as_u32());
        let mut statements = Vec::with_capacity(events.len());
        for event in events {
            statements.push(match event {
                StreamEventNode::Enqueue(chunk) => {
                    format!("c.enqueue({})", self.serialize(chunk)?)
                }
                StreamEventNode::Error(payload) => {
                    format!("c.error({})", self.serialize(payload)?)
                }
                StreamEventNode::Close => "c.close()".into(),
            });
        }
        self.core.stack.pop();
        let body = statements.join(";");
        let expr = if self.core.features.has(Feature::METHOD_SHORTHAND) {
            format!("new ReadableStream({{start(c){{{body}}}}})")
        } else if self.core.arrows() {
            format!("new ReadableStream({{start:c=>{{{body}}}}})")
        } else {
            format!("new ReadableStream({{start:function(c){{{body}}}}})")
        };
        Ok(self.assign(id, expr))
    }
}

// --- RENDER HELPERS ---

fn constant_literal(c: ConstantValue) -> &'static str {
    match c {
        ConstantValue::True => "true",
        ConstantValue::False => "false",
        ConstantValue::Undefined => "void 0",
        ConstantValue::Null => "null",
        ConstantValue::NegZero => "-0",
        ConstantValue::Infinity => "1/0",
        ConstantValue::NegInfinity => "-1/0",
        ConstantValue::NaN => "0/0",
    }
}

/// f64 → shortest decimal literal. Rust's `Display` never produces an
/// exponent, so the output is always a valid JS number literal.
pub(crate) fn format_number(n: f64) -> String {
    format!("{n}")
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Key as it appears in an object literal.
fn render_key_literal(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Key as a member accessor on a named slot.
fn render_key_accessor(key: &str) -> String {
    if is_identifier(key) {
        format!(".{key}")
    } else {
        format!("[{}]", quote(key))
    }
}

/// Converts a rendered literal key back to accessor form (used by the
/// assignment fallback where the pieces were rendered for literal use).
fn literal_key_to_accessor(rendered: &str) -> String {
    if rendered.starts_with('"') {
        format!("[{rendered}]")
    } else {
        format!(".{rendered}")
    }
}

/// Pre-scan: every id an `IndexedValue` targets must be bound to a named
/// slot before any expression that references it evaluates. Recomputing
/// this from the tree keeps `compile_json` correct on bare IR.
pub(crate) fn scan_marks(node: &Node, marked: &mut HashSet<u32>) {
    match node {
        Node::IndexedValue(id) => {
            marked.insert(id.as_u32());
        }
        Node::Array { items, .. } => {
            for item in items.iter().flatten() {
                scan_marks(item, marked);
            }
        }
        Node::Object { record, .. } | Node::NullConstructor { record, .. } => {
            for value in &record.values {
                scan_marks(value, marked);
            }
        }
        Node::Error { options, .. } | Node::AggregateError { options, .. } => {
            if let Some(record) = options {
                for value in &record.values {
                    scan_marks(value, marked);
                }
            }
        }
        Node::Boxed { inner, .. } => scan_marks(inner, marked),
        Node::TypedArray { buffer, .. } => scan_marks(buffer, marked),
        Node::Map { keys, values, .. } => {
            for node in keys.iter().chain(values) {
                scan_marks(node, marked);
            }
        }
        Node::Set { items, .. } => {
            for item in items {
                scan_marks(item, marked);
            }
        }
        Node::Promise { value, .. }
        | Node::PromiseResolve { value, .. }
        | Node::PromiseReject { value, .. }
        | Node::ReadableStreamEnqueue { value, .. }
        | Node::ReadableStreamError { value, .. } => scan_marks(value, marked),
        Node::Blob { buffer, .. } | Node::File { buffer, .. } => scan_marks(buffer, marked),
        Node::Headers { record, .. } | Node::FormData { record, .. } => {
            for value in &record.values {
                scan_marks(value, marked);
            }
        }
        Node::Request { options, .. }
        | Node::Event { options, .. }
        | Node::CustomEvent { options, .. } => scan_marks(options, marked),
        Node::Response { body, options, .. } => {
            if let Some(body) = body {
                scan_marks(body, marked);
            }
            scan_marks(options, marked);
        }
        Node::ReadableStream { events, .. } => {
            for event in events {
                match event {
                    StreamEventNode::Enqueue(n) | StreamEventNode::Error(n) => {
                        scan_marks(n, marked)
                    }
                    StreamEventNode::Close => {}
                }
            }
        }
        _ => {}
    }
}
