//! Centralized error handling for Vivicode.
//!
//! All failure conditions are propagated through the `Result` type; the
//! library never panics (`#![deny(clippy::panic)]`, `#![deny(clippy::unwrap_used)]`).
//!
//! ## Error Categories
//!
//! Errors are categorized by their domain:
//!
//! - **Unsupported values** ([`VivicodeError::UnsupportedType`]): the parser
//!   found a value with no applicable case.
//! - **Compatibility** ([`VivicodeError::FeatureDisabled`]): a faithful
//!   emission would need a language idiom the caller masked out.
//! - **Plugins** ([`VivicodeError::MissingPlugin`]): an IR node carries a
//!   plugin tag with no registered resolver.
//! - **Registry** ([`VivicodeError::TagCollision`]): a reference tag was
//!   declared twice.
//! - **Evaluation** ([`VivicodeError::Eval`]): `deserialize` failed to lex,
//!   parse, or evaluate the source expression.
//! - **Internal** ([`VivicodeError::Invariant`]): malformed IR or a logic
//!   error; should not occur on IR the library produced itself.
//!
//! Note that a rejected promise is *not* an error: the rejection payload is
//! preserved in the IR and replayed at reconstruction time.
//!
//! ## Usage
//!
//! ```rust
//! use vivicode::{serialize, VivicodeError, JsValue};
//!
//! match serialize(&JsValue::number(1.5)) {
//!     Ok(source) => assert_eq!(source, "1.5"),
//!     Err(VivicodeError::UnsupportedType(name)) => eprintln!("cannot encode {name}"),
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use std::fmt;

/// A specialized `Result` type for Vivicode operations.
///
/// Equivalent to `std::result::Result<T, VivicodeError>` and used throughout
/// the library.
pub type Result<T> = std::result::Result<T, VivicodeError>;

/// The master error enum covering all failure domains in Vivicode.
///
/// The type is `Clone` so callbacks (streaming mode routes errors through
/// `on_error`) can hand the same error to several sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VivicodeError {
    /// The parser met a value with no applicable case.
    ///
    /// Carries the host-side type name of the offending value. Raised for
    /// foreign handles that are neither registered references nor claimed by
    /// a plugin, and by the sync parser for async-only values (promises,
    /// streams, body-bearing web objects).
    UnsupportedType(&'static str),

    /// A faithful emission requires a feature the caller disabled.
    ///
    /// Carries the name of the required feature, e.g. a `Map` value with
    /// `Feature::MAP` masked out.
    FeatureDisabled(&'static str),

    /// A `Plugin` IR node names a tag with no registered resolver.
    MissingPlugin(String),

    /// `create_reference` was called with a tag that is already bound.
    TagCollision(String),

    /// `deserialize` could not evaluate the source expression.
    ///
    /// The string carries the lexer/parser/interpreter diagnostic.
    Eval(String),

    /// Malformed IR or an internal logic error.
    ///
    /// The serializer never raises this on IR it produced itself; it occurs
    /// for hand-built or corrupted JSON IR (unknown tag, missing payload
    /// field, dangling ref id). Anything else indicates a library bug.
    Invariant(String),
}

impl fmt::Display for VivicodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType(name) => write!(f, "Unsupported value type: {name}"),
            Self::FeatureDisabled(feat) => {
                write!(f, "Feature Disabled: emission requires {feat}")
            }
            Self::MissingPlugin(tag) => write!(f, "Missing Plugin: no resolver for tag {tag:?}"),
            Self::TagCollision(tag) => {
                write!(f, "Reference tag {tag:?} is already registered")
            }
            Self::Eval(msg) => write!(f, "Evaluation Error: {msg}"),
            Self::Invariant(msg) => write!(f, "Internal Logic Error: {msg}"),
        }
    }
}

impl std::error::Error for VivicodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable_enough_for_logs() {
        let e = VivicodeError::UnsupportedType("WeakMap");
        assert_eq!(e.to_string(), "Unsupported value type: WeakMap");

        let e = VivicodeError::MissingPlugin("big-decimal".into());
        assert!(e.to_string().contains("big-decimal"));
    }
}
