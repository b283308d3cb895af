use std::fmt;

/// A strong type for the reference identifier assigned to every
/// non-primitive value in first-seen order during a parse.
///
/// Identifiers are dense within one parse in self-contained mode; in
/// cross-referenced mode they are drawn from the shared context counter so
/// subsequent parses extend the same id space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(u32); // u32 is sufficient for 4 billion live references per scope.

impl RefId {
    /// Creates a new RefId.
    /// Restricted to the crate so ids only ever come from a parse context.
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefId({})", self.0)
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
