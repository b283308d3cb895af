//! The reference registry.
//!
//! A bidirectional map between user-declared opaque handles and stable
//! string tags. Registered handles survive a round trip *by identity*: the
//! parser emits a `Reference` node carrying the tag, and the deserializing
//! side looks the tag up in its own registry (exposed to emitted code as
//! `self.$REFS`).
//!
//! The registry is an explicit context object; a thread-local process
//! default exists as sugar for the common single-registry setup.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, VivicodeError};
use crate::value::JsValue;

/// Bidirectional tag ↔ handle map.
///
/// Append-mostly and stable for the registry's lifetime; tags can never be
/// rebound.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    by_tag: RefCell<HashMap<String, JsValue>>,
    by_identity: RefCell<HashMap<usize, String>>,
}

impl ReferenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `tag` and returns the handle for chaining.
    ///
    /// Fails with [`VivicodeError::TagCollision`] when the tag is taken, and
    /// with [`VivicodeError::UnsupportedType`] when the handle is a
    /// primitive (primitives have no identity to preserve).
    pub fn register(&self, tag: impl Into<String>, handle: JsValue) -> Result<JsValue> {
        let tag = tag.into();
        let identity = handle
            .identity()
            .ok_or(VivicodeError::UnsupportedType(handle.type_name()))?;

        let mut by_tag = self.by_tag.borrow_mut();
        if by_tag.contains_key(&tag) {
            return Err(VivicodeError::TagCollision(tag));
        }
        by_tag.insert(tag.clone(), handle.clone());
        self.by_identity.borrow_mut().insert(identity, tag);
        Ok(handle)
    }

    /// The tag a handle was registered under, if any.
    pub fn tag_of(&self, handle: &JsValue) -> Option<String> {
        let identity = handle.identity()?;
        self.by_identity.borrow().get(&identity).cloned()
    }

    /// The handle registered under `tag`, if any.
    pub fn lookup(&self, tag: &str) -> Option<JsValue> {
        self.by_tag.borrow().get(tag).cloned()
    }

    /// All registered tags, for building the `self.$REFS` table.
    pub fn tags(&self) -> Vec<String> {
        self.by_tag.borrow().keys().cloned().collect()
    }
}

thread_local! {
    static PROCESS_REGISTRY: Rc<ReferenceRegistry> = Rc::new(ReferenceRegistry::new());
}

/// The thread-local default registry used when no explicit one is supplied.
pub fn process_registry() -> Rc<ReferenceRegistry> {
    PROCESS_REGISTRY.with(Rc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_by_identity() {
        let reg = ReferenceRegistry::new();
        let handle = JsValue::empty_object();
        reg.register("config", handle.clone()).unwrap();

        assert_eq!(reg.tag_of(&handle).as_deref(), Some("config"));
        assert_eq!(
            reg.lookup("config").and_then(|v| v.identity()),
            handle.identity()
        );
    }

    #[test]
    fn rejects_tag_reuse() {
        let reg = ReferenceRegistry::new();
        reg.register("x", JsValue::empty_object()).unwrap();
        let err = reg.register("x", JsValue::empty_object()).unwrap_err();
        assert_eq!(err, VivicodeError::TagCollision("x".into()));
    }

    #[test]
    fn rejects_primitives() {
        let reg = ReferenceRegistry::new();
        assert!(reg.register("n", JsValue::number(1.0)).is_err());
    }
}
