//! The cross-referenced serializer scheme.
//!
//! Every id binds into the process-shared reference table `$R`, so separate
//! expressions evaluated in the same host can alias each other's values.
//! Each output is wrapped in an IIFE that resolves `$R` from `self`,
//! namespaced by scope id when one is given; streaming follow-ups reuse the
//! same wrapper and call the controller hooks the constructor expressions
//! installed (`$R[i].s(v)`, `.f(v)`, `.e(v)`, `.r(v)`, `.c()`).

use crate::escape::quote;
use crate::features::Feature;
use crate::ir::{Node, RefId};

use super::{CoreState, Scheme, Serializer};

/// Scheme: shared-table bindings.
#[derive(Debug, Default)]
pub(crate) struct CrossScheme {
    /// Optional namespace of the shared table.
    pub scope: Option<String>,
}

impl Scheme for CrossScheme {
    fn ref_param(&mut self, _core: &mut CoreState, id: RefId) -> String {
        format!("$R[{}]", id.as_u32())
    }

    fn assign(&mut self, _core: &mut CoreState, id: RefId, expr: String) -> String {
        // Cross mode binds unconditionally: later calls may reference any
        // id this one introduced.
        format!("$R[{}]={expr}", id.as_u32())
    }

    fn finish(
        &mut self,
        core: &mut CoreState,
        root: &Node,
        body: String,
        patches: String,
    ) -> String {
        let seq = if patches.is_empty() {
            body
        } else {
            match root.own_id() {
                Some(id) => format!("({body},{patches},$R[{}])", id.as_u32()),
                None => format!("({body},{patches})"),
            }
        };
        let header = match &self.scope {
            None => "self.$R=self.$R||[]".to_string(),
            Some(scope) => {
                let key = quote(scope);
                format!("(self.$R=self.$R||{{}})[{key}]=self.$R[{key}]||[]")
            }
        };
        if core.features.has(Feature::ARROW_FUNCTION) {
            format!("(($R)=>({seq}))({header})")
        } else {
            format!("(function($R){{return {seq}}})({header})")
        }
    }
}

/// Serializes a tree in cross-referenced mode.
pub(crate) fn serialize_tree(
    node: &Node,
    features: Feature,
    plugins: crate::plugin::PluginRegistry,
    scope: Option<String>,
) -> crate::error::Result<String> {
    Serializer::new(features, plugins, CrossScheme { scope }).serialize_top(node)
}
