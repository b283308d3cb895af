use super::node::Node;

/// Runtime integrity state of a non-primitive, preserved across
/// serialization and applied *after* every mutation that affects the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectFlag {
    /// No integrity constraint.
    #[default]
    None,
    /// `Object.seal` was applied.
    Sealed,
    /// `Object.freeze` was applied.
    Frozen,
    /// `Object.preventExtensions` was applied.
    NonExtensible,
}

impl ObjectFlag {
    /// Stable numeric encoding used by the JSON IR (`o` field).
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Sealed => 1,
            Self::Frozen => 2,
            Self::NonExtensible => 3,
        }
    }

    /// Decodes the JSON IR encoding.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Sealed),
            2 => Some(Self::Frozen),
            3 => Some(Self::NonExtensible),
            _ => None,
        }
    }
}

/// A property key in an object record.
///
/// `SymbolIterator` is not a string key: it encodes an iterator-installation
/// directive whose value node is a freshly-materialized array of the drained
/// items.
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    /// An ordinary string key (stored raw; escaped at emission).
    String(String),
    /// The iterator-installation sentinel.
    SymbolIterator,
}

/// Parallel key/value arrays describing the own properties of an object.
///
/// Keys keep insertion order. The explicit size equals `keys.len()` and is
/// persisted in the JSON IR so truncated records are detectable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectRecord {
    /// Property keys, possibly including the `SymbolIterator` sentinel.
    pub keys: Vec<PropKey>,
    /// Property value nodes, index-parallel to `keys`.
    pub values: Vec<Node>,
}

impl ObjectRecord {
    /// Number of properties.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the record has no properties.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Like [`ObjectRecord`] but keys are plain strings only.
///
/// Used for `Headers` and `FormData`, whose key space cannot contain
/// symbols.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlainRecord {
    /// Entry keys.
    pub keys: Vec<String>,
    /// Entry value nodes, index-parallel to `keys`.
    pub values: Vec<Node>,
}

impl PlainRecord {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
