//! Public entry points.
//!
//! [`Vivicode`] is the configured pipeline (feature mask, plugins, reference
//! registry); the free functions at the crate root delegate to a default
//! instance for the common path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;
use crate::eval::Evaluator;
use crate::features::Feature;
use crate::json::{node_to_json, JsonNode, ValueBuilder};
use crate::parse::future::AsyncParser;
use crate::parse::sync::SyncParser;
use crate::parse::{IdSpace, ParserState, SharedIds};
use crate::plugin::{Plugin, PluginRegistry};
use crate::registry::{process_registry, ReferenceRegistry};
use crate::serializer::{contained, cross};
use crate::stream::{CrossConfig, StreamCallbacks, StreamHandle, StreamWriter};
use crate::value::JsValue;

thread_local! {
    // One shared id space per cross-mode scope, so subsequent calls within
    // a scope extend the same table.
    static SCOPE_CONTEXTS: RefCell<HashMap<String, Rc<SharedIds>>> =
        RefCell::new(HashMap::new());
}

fn scope_ids(scope: &Option<String>) -> Rc<SharedIds> {
    let key = scope.clone().unwrap_or_default();
    SCOPE_CONTEXTS.with(|contexts| {
        Rc::clone(
            contexts
                .borrow_mut()
                .entry(key)
                .or_insert_with(|| Rc::new(SharedIds::default())),
        )
    })
}

/// Options of the cross-referenced operations.
#[derive(Debug, Default, Clone)]
pub struct CrossOptions {
    /// Namespaces the shared table; distinct scopes never collide.
    pub scope_id: Option<String>,
}

/// A configured serialization pipeline.
///
/// ```rust
/// use vivicode::{Feature, JsValue, Vivicode};
///
/// let out = Vivicode::builder()
///     .disable(Feature::ARROW_FUNCTION)
///     .serialize(&JsValue::array(vec![JsValue::number(1.0)]))
///     .unwrap();
/// assert_eq!(out, "[1]");
/// ```
pub struct Vivicode {
    disabled_features: Feature,
    plugins: PluginRegistry,
    registry: Option<Rc<ReferenceRegistry>>,
}

impl Default for Vivicode {
    fn default() -> Self {
        Self {
            disabled_features: Feature::empty(),
            plugins: PluginRegistry::new(),
            registry: None,
        }
    }
}

impl Vivicode {
    /// Starts a builder with default options.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Masks features out of the emission matrix.
    pub fn disable(mut self, mask: Feature) -> Self {
        self.disabled_features |= mask;
        self
    }

    /// Registers a plugin.
    pub fn plugin(mut self, plugin: Rc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Uses an explicit reference registry instead of the thread default.
    pub fn registry(mut self, registry: Rc<ReferenceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn features(&self) -> Feature {
        Feature::enabled_from_disabled(self.disabled_features)
    }

    fn active_registry(&self) -> Rc<ReferenceRegistry> {
        self.registry.clone().unwrap_or_else(process_registry)
    }

    fn sync_state(&self, ids: IdSpace) -> ParserState {
        ParserState::new(
            self.features(),
            self.plugins.clone(),
            self.active_registry(),
            ids,
        )
    }

    // --- SELF-CONTAINED OPERATIONS ---

    /// Serializes a value into one self-contained expression. Fails when
    /// the value is unsupported or promise-bearing.
    pub fn serialize(&self, value: &JsValue) -> Result<String> {
        let mut parser = SyncParser::new(self.sync_state(IdSpace::local()));
        let node = parser.parse(value)?;
        contained::serialize_tree(&node, self.features(), self.plugins.clone())
    }

    /// Like [`Vivicode::serialize`], but awaits promises and drains
    /// readable streams.
    pub async fn serialize_async(&self, value: &JsValue) -> Result<String> {
        let parser = AsyncParser::new(self.sync_state(IdSpace::local()));
        let node = parser.parse(value.clone()).await?;
        contained::serialize_tree(&node, self.features(), self.plugins.clone())
    }

    /// Parses a value into the JSON-safe IR tree.
    pub fn to_json(&self, value: &JsValue) -> Result<JsonNode> {
        let mut parser = SyncParser::new(self.sync_state(IdSpace::local()));
        let node = parser.parse(value)?;
        Ok(node_to_json(&node))
    }

    /// Async variant of [`Vivicode::to_json`].
    pub async fn to_json_async(&self, value: &JsValue) -> Result<JsonNode> {
        let parser = AsyncParser::new(self.sync_state(IdSpace::local()));
        let node = parser.parse(value.clone()).await?;
        Ok(node_to_json(&node))
    }

    /// Re-emits source text from an IR tree. Fails on malformed IR.
    pub fn compile_json(&self, node: &JsonNode) -> Result<String> {
        let node = node.to_node()?;
        contained::serialize_tree(&node, self.features(), self.plugins.clone())
    }

    /// Reconstructs a value graph directly from an IR tree.
    pub fn from_json(&self, node: &JsonNode) -> Result<JsValue> {
        let node = node.to_node()?;
        ValueBuilder::new(self.active_registry(), self.plugins.clone()).build(&node)
    }

    /// Reconstructs from IR against a caller-supplied shared id table
    /// (cross-from-JSON).
    pub fn from_json_with_refs(
        &self,
        node: &JsonNode,
        refs: Rc<RefCell<HashMap<u32, JsValue>>>,
    ) -> Result<JsValue> {
        let node = node.to_node()?;
        ValueBuilder::with_table(refs, self.active_registry(), self.plugins.clone()).build(&node)
    }

    /// Evaluates emitted source text back into a value graph. Fails when
    /// the text does not evaluate.
    pub fn deserialize(&self, source: &str) -> Result<JsValue> {
        Evaluator::with_registry(&self.active_registry()).eval(source)
    }

    // --- CROSS-REFERENCED OPERATIONS ---

    /// Serializes one expression bound to the shared table `$R`.
    pub fn cross_serialize(&self, value: &JsValue, options: &CrossOptions) -> Result<String> {
        let ids = scope_ids(&options.scope_id);
        let mut parser = SyncParser::new(self.sync_state(IdSpace::Shared(ids)));
        let node = parser.parse(value)?;
        cross::serialize_tree(
            &node,
            self.features(),
            self.plugins.clone(),
            options.scope_id.clone(),
        )
    }

    /// Async variant of [`Vivicode::cross_serialize`].
    pub async fn cross_serialize_async(
        &self,
        value: &JsValue,
        options: &CrossOptions,
    ) -> Result<String> {
        let ids = scope_ids(&options.scope_id);
        let parser = AsyncParser::new(self.sync_state(IdSpace::Shared(ids)));
        let node = parser.parse(value.clone()).await?;
        cross::serialize_tree(
            &node,
            self.features(),
            self.plugins.clone(),
            options.scope_id.clone(),
        )
    }

    /// Starts a streaming cross-serialization; the returned handle is the
    /// disposer and must be driven with [`StreamHandle::join`].
    pub fn cross_serialize_stream(
        &self,
        value: &JsValue,
        options: &CrossOptions,
        callbacks: StreamCallbacks,
    ) -> StreamHandle {
        let config = CrossConfig {
            features: self.features(),
            plugins: self.plugins.clone(),
            registry: self.active_registry(),
            scope: options.scope_id.clone(),
            ids: scope_ids(&options.scope_id),
        };
        crate::stream::cross_serialize_stream(value, config, callbacks)
    }

    /// Creates a multiplexing stream writer binding roots onto
    /// `global_identifier`.
    pub fn stream_writer(
        &self,
        global_identifier: impl Into<String>,
        options: &CrossOptions,
        on_data: Box<dyn FnMut(&str)>,
        on_done: Box<dyn FnMut()>,
        on_error: Box<dyn FnMut(crate::error::VivicodeError)>,
    ) -> StreamWriter {
        StreamWriter::new(
            global_identifier.into(),
            self.features(),
            self.plugins.clone(),
            self.active_registry(),
            options.scope_id.clone(),
            scope_ids(&options.scope_id),
            on_data,
            on_done,
            on_error,
        )
    }
}

// --- FREE FUNCTIONS (default pipeline) ---

/// Serializes a value with default options. See [`Vivicode::serialize`].
pub fn serialize(value: &JsValue) -> Result<String> {
    Vivicode::default().serialize(value)
}

/// See [`Vivicode::serialize_async`].
pub async fn serialize_async(value: &JsValue) -> Result<String> {
    Vivicode::default().serialize_async(value).await
}

/// See [`Vivicode::to_json`].
pub fn to_json(value: &JsValue) -> Result<JsonNode> {
    Vivicode::default().to_json(value)
}

/// See [`Vivicode::to_json_async`].
pub async fn to_json_async(value: &JsValue) -> Result<JsonNode> {
    Vivicode::default().to_json_async(value).await
}

/// See [`Vivicode::compile_json`].
pub fn compile_json(node: &JsonNode) -> Result<String> {
    Vivicode::default().compile_json(node)
}

/// See [`Vivicode::from_json`].
pub fn from_json(node: &JsonNode) -> Result<JsValue> {
    Vivicode::default().from_json(node)
}

/// See [`Vivicode::deserialize`].
pub fn deserialize(source: &str) -> Result<JsValue> {
    Vivicode::default().deserialize(source)
}

/// See [`Vivicode::cross_serialize`].
pub fn cross_serialize(value: &JsValue, options: &CrossOptions) -> Result<String> {
    Vivicode::default().cross_serialize(value, options)
}

/// See [`Vivicode::cross_serialize_async`].
pub async fn cross_serialize_async(value: &JsValue, options: &CrossOptions) -> Result<String> {
    Vivicode::default().cross_serialize_async(value, options).await
}

/// See [`Vivicode::cross_serialize_stream`].
pub fn cross_serialize_stream(
    value: &JsValue,
    options: &CrossOptions,
    callbacks: StreamCallbacks,
) -> StreamHandle {
    Vivicode::default().cross_serialize_stream(value, options, callbacks)
}

/// Registers `handle` under `tag` in the thread's process registry so it
/// survives round trips by identity. Fails when the tag is taken.
pub fn create_reference(tag: impl Into<String>, handle: JsValue) -> Result<JsValue> {
    process_registry().register(tag, handle)
}
