//! The intermediate node tree produced by the parse phase.
//!
//! This module defines the `RefId` identifier, the `Node` sum type and the
//! property-record structures that together capture exactly the information
//! the serialize phase needs to emit code.

/// Defines the `RefId` type.
pub mod id;
/// Defines the `Node` tree and its payload enums.
pub mod node;
/// Defines property records and object integrity flags.
pub mod record;

pub use id::RefId;
pub use node::{
    ConstantValue, ErrorKind, Node, StreamEventNode, TypedArrayKind, WellKnownSymbol,
};
pub use record::{ObjectFlag, ObjectRecord, PlainRecord, PropKey};
