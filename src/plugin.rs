//! Pluggable serialization backends for foreign value shapes.
//!
//! A plugin claims values the core dispatch does not recognize and carries
//! them through the pipeline as opaque JSON payloads: `parse` captures the
//! value, `serialize` renders source text for it, `deserialize` rebuilds the
//! value on the other side.

use std::rc::Rc;

use crate::error::{Result, VivicodeError};
use crate::value::JsValue;

/// Interface for third-party value handlers.
///
/// `test` runs after the reference-registry check but before the terminal
/// unsupported-type failure, so a plugin can claim anything the core
/// dispatch would otherwise reject (typically [`crate::ObjectKind::Foreign`]
/// handles).
pub trait Plugin {
    /// A stable tag identifying this plugin in the IR.
    fn tag(&self) -> &str;

    /// Returns true when this plugin wants to handle `value`.
    fn test(&self, value: &JsValue) -> bool;

    /// Captures the value into a JSON payload.
    fn parse(&self, value: &JsValue) -> Result<serde_json::Value>;

    /// Renders the payload as a source expression.
    fn serialize(&self, payload: &serde_json::Value) -> Result<String>;

    /// Rebuilds a value from the payload.
    fn deserialize(&self, payload: &serde_json::Value) -> Result<JsValue>;
}

/// Ordered plugin collection.
///
/// Lookup by value walks registration order; lookup by tag is used on the
/// emission and reconstruction paths.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Rc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<&str> = self.plugins.iter().map(|p| p.tag()).collect();
        f.debug_tuple("PluginRegistry").field(&tags).finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin. Later registrations with the same tag shadow earlier
    /// ones on the tag path; on the value path the first `test` match wins.
    pub fn register(&mut self, plugin: Rc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// True when no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// The first plugin claiming `value`, if any.
    pub fn find_for_value(&self, value: &JsValue) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.test(value))
            .map(|p| p.as_ref())
    }

    /// The plugin registered for `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Result<&dyn Plugin> {
        self.plugins
            .iter()
            .rev()
            .find(|p| p.tag() == tag)
            .map(|p| p.as_ref())
            .ok_or_else(|| VivicodeError::MissingPlugin(tag.to_string()))
    }
}
