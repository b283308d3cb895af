//! The parse phase.
//!
//! Walks an input value, assigns stable reference identifiers to every
//! non-primitive, detects aliases and cycles, and produces the intermediate
//! node tree. Three variants share the state in this module:
//!
//! - [`sync::SyncParser`] never suspends and rejects promise-bearing values;
//! - [`future::AsyncParser`] awaits promises and drains readable streams;
//! - [`stream::StreamingParser`] never awaits: async completions become
//!   constructor nodes plus pending tasks the streaming driver settles later.

/// The asynchronous parser.
pub mod future;
/// The streaming (cross-mode) parser.
pub mod stream;
/// The synchronous parser.
pub mod sync;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, VivicodeError};
use crate::features::Feature;
use crate::ir::{ConstantValue, Node, RefId};
use crate::plugin::PluginRegistry;
use crate::registry::ReferenceRegistry;
use crate::value::JsValue;

/// Id source for self-contained parses: dense, starts at zero.
#[derive(Debug, Default)]
pub(crate) struct LocalIds {
    next: u32,
    seen: HashMap<usize, u32>,
}

/// Id source carried in a cross-mode context so subsequent parses extend the
/// same id space.
#[derive(Debug, Default)]
pub struct SharedIds {
    next: Cell<u32>,
    seen: RefCell<HashMap<usize, u32>>,
}

/// Where a parse draws its reference identifiers from.
#[derive(Debug)]
pub(crate) enum IdSpace {
    /// Dense ids private to one parse.
    Local(LocalIds),
    /// Ids shared across parses of one cross-mode scope.
    Shared(Rc<SharedIds>),
}

impl IdSpace {
    /// A fresh self-contained id space.
    pub fn local() -> Self {
        Self::Local(LocalIds::default())
    }

    /// The id already assigned to `identity`, if it was seen before.
    pub fn lookup(&self, identity: usize) -> Option<RefId> {
        match self {
            Self::Local(ids) => ids.seen.get(&identity).copied().map(RefId::new),
            Self::Shared(ids) => ids.seen.borrow().get(&identity).copied().map(RefId::new),
        }
    }

    /// Assigns the next id to `identity`.
    pub fn assign(&mut self, identity: usize) -> RefId {
        match self {
            Self::Local(ids) => {
                let id = ids.next;
                ids.next += 1;
                ids.seen.insert(identity, id);
                RefId::new(id)
            }
            Self::Shared(ids) => {
                let id = ids.next.get();
                ids.next.set(id + 1);
                ids.seen.borrow_mut().insert(identity, id);
                RefId::new(id)
            }
        }
    }

    /// Allocates an id with no backing identity (freshly-materialized
    /// nodes such as drained iterator arrays).
    pub fn fresh(&mut self) -> RefId {
        match self {
            Self::Local(ids) => {
                let id = ids.next;
                ids.next += 1;
                RefId::new(id)
            }
            Self::Shared(ids) => {
                let id = ids.next.get();
                ids.next.set(id + 1);
                RefId::new(id)
            }
        }
    }
}

/// State shared by all parser variants.
#[derive(Debug)]
pub(crate) struct ParserState {
    /// Enabled feature matrix (`all & !disabled`).
    pub features: Feature,
    /// Registered plugins.
    pub plugins: PluginRegistry,
    /// Reference registry consulted before any other dispatch case.
    pub registry: Rc<ReferenceRegistry>,
    /// Reference id source.
    pub ids: IdSpace,
}

impl ParserState {
    pub fn new(
        features: Feature,
        plugins: PluginRegistry,
        registry: Rc<ReferenceRegistry>,
        ids: IdSpace,
    ) -> Self {
        Self {
            features,
            plugins,
            registry,
            ids,
        }
    }

    /// Fails with `FeatureDisabled` unless `needed` is enabled.
    pub fn require(&self, needed: Feature, name: &'static str) -> Result<()> {
        if self.features.has(needed) {
            Ok(())
        } else {
            Err(VivicodeError::FeatureDisabled(name))
        }
    }

    /// Parses a primitive; `None` means the value is a reference type and
    /// the caller's dispatch takes over.
    pub fn parse_primitive(&mut self, value: &JsValue) -> Result<Option<Node>> {
        let node = match value {
            JsValue::Undefined => Node::Constant(ConstantValue::Undefined),
            JsValue::Null => Node::Constant(ConstantValue::Null),
            JsValue::Bool(true) => Node::Constant(ConstantValue::True),
            JsValue::Bool(false) => Node::Constant(ConstantValue::False),
            JsValue::Number(n) => number_node(*n),
            JsValue::String(s) => Node::String(s.to_string()),
            JsValue::BigInt(digits) => {
                self.require(Feature::BIGINT, "BigInt")?;
                Node::BigInt(digits.to_string())
            }
            JsValue::Symbol(symbol) => {
                self.require(Feature::SYMBOL, "Symbol")?;
                // No backing identity: well-known symbols are singletons in
                // the target runtime anyway.
                Node::WellKnownSymbol {
                    id: self.ids.fresh(),
                    symbol: *symbol,
                }
            }
            JsValue::Object(_) => return Ok(None),
        };
        Ok(Some(node))
    }
}

/// Number-to-node classification: the non-finite values and negative zero
/// take the literal-constant strategy.
pub(crate) fn number_node(n: f64) -> Node {
    if n.is_nan() {
        Node::Constant(ConstantValue::NaN)
    } else if n == f64::INFINITY {
        Node::Constant(ConstantValue::Infinity)
    } else if n == f64::NEG_INFINITY {
        Node::Constant(ConstantValue::NegInfinity)
    } else if n == 0.0 && n.is_sign_negative() {
        Node::Constant(ConstantValue::NegZero)
    } else {
        Node::Number(n)
    }
}

/// Splits error properties into the options record per the error-options
/// rule: `name` and `message` never survive, `stack` survives only when the
/// matrix permits it, everything else (including `cause`) is kept.
pub(crate) fn error_option_props<'a>(
    features: Feature,
    props: &'a [(String, JsValue)],
) -> Vec<(&'a str, &'a JsValue)> {
    props
        .iter()
        .filter(|(key, _)| match key.as_str() {
            "name" | "message" => false,
            "stack" => features.has(Feature::ERROR_PROTOTYPE_STACK),
            _ => true,
        })
        .map(|(key, value)| (key.as_str(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_dense_and_stable() {
        let mut ids = IdSpace::local();
        let a = ids.assign(0x10);
        let b = ids.assign(0x20);
        assert_eq!(a.as_u32(), 0);
        assert_eq!(b.as_u32(), 1);
        assert_eq!(ids.lookup(0x10), Some(a));
        assert_eq!(ids.lookup(0x30), None);
    }

    #[test]
    fn shared_ids_extend_across_parses() {
        let shared = Rc::new(SharedIds::default());
        let mut first = IdSpace::Shared(Rc::clone(&shared));
        first.assign(0x10);
        let mut second = IdSpace::Shared(Rc::clone(&shared));
        let id = second.assign(0x20);
        assert_eq!(id.as_u32(), 1);
        assert!(second.lookup(0x10).is_some());
    }

    #[test]
    fn number_classification() {
        assert_eq!(number_node(f64::INFINITY), Node::Constant(ConstantValue::Infinity));
        assert_eq!(number_node(-0.0), Node::Constant(ConstantValue::NegZero));
        assert_eq!(number_node(0.0), Node::Number(0.0));
    }
}
