//! The feature/compatibility matrix.
//!
//! A bitset of target-runtime idioms the serializer is allowed to use.
//! Callers pass a *disabled* mask; the system computes
//! `enabled = Feature::all() & !disabled` and consults it for every emission
//! choice that has an older alternative form. Values whose faithful emission
//! requires a disabled feature are rejected at parse time.

use bitflags::bitflags;

bitflags! {
    /// Permitted idioms of the target runtime.
    ///
    /// Each bit corresponds to one constructor or syntax form the emitted
    /// expression may rely on. Disabling a bit either switches the emitter to
    /// an older spelling (e.g. `function` instead of `=>`) or, where no older
    /// spelling exists, makes the parser reject the value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Feature: u16 {
        /// `AggregateError` constructor (ES2021).
        const AGGREGATE_ERROR = 1 << 0;
        /// `Array.prototype.values` for iterator installation.
        const ARRAY_PROTOTYPE_VALUES = 1 << 1;
        /// Arrow function syntax.
        const ARROW_FUNCTION = 1 << 2;
        /// `BigInt` literals (`123n`).
        const BIGINT = 1 << 3;
        /// `BigInt64Array` / `BigUint64Array`.
        const BIGINT_TYPED_ARRAY = 1 << 4;
        /// Own `stack` property preservation on errors.
        const ERROR_PROTOTYPE_STACK = 1 << 5;
        /// `Map` constructor.
        const MAP = 1 << 6;
        /// Method shorthand in object literals.
        const METHOD_SHORTHAND = 1 << 7;
        /// `Object.assign` for attaching dictionaries.
        const OBJECT_ASSIGN = 1 << 8;
        /// `Promise` constructor and combinators.
        const PROMISE = 1 << 9;
        /// `Set` constructor.
        const SET = 1 << 10;
        /// `Symbol` and well-known symbols.
        const SYMBOL = 1 << 11;
        /// Typed arrays, `ArrayBuffer` and `DataView`.
        const TYPED_ARRAY = 1 << 12;
        /// Web-platform constructors (URL, Blob, Headers, Request, ...).
        const WEB_API = 1 << 13;
    }
}

impl Default for Feature {
    fn default() -> Self {
        Self::all()
    }
}

impl Feature {
    /// Computes the enabled set from a caller-supplied disabled mask.
    pub fn enabled_from_disabled(disabled: Feature) -> Feature {
        Feature::all() & !disabled
    }

    /// Returns `true` when `self` contains every bit of `needed`.
    pub fn has(self, needed: Feature) -> bool {
        self.contains(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mask_inverts() {
        let enabled = Feature::enabled_from_disabled(Feature::ARROW_FUNCTION | Feature::MAP);
        assert!(!enabled.has(Feature::ARROW_FUNCTION));
        assert!(!enabled.has(Feature::MAP));
        assert!(enabled.has(Feature::SET));
        assert!(enabled.has(Feature::OBJECT_ASSIGN));
    }

    #[test]
    fn default_is_everything() {
        assert_eq!(Feature::default(), Feature::all());
    }
}
