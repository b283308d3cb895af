//! Streaming-parse support types.
//!
//! The streaming parser is the sync parser in streaming mode (see
//! [`super::sync::SyncParser::new_streaming`]); this module holds the
//! pending-completion descriptors it hands to the streaming driver.

use crate::ir::RefId;
use crate::value::{PromiseFuture, StreamMessage, StreamSource};

/// An async completion observed during a streaming parse.
///
/// The driver awaits these and turns each outcome into follow-up
/// expressions against the shared reference table.
pub(crate) enum PendingTask {
    /// A promise settlement bound to the `PromiseConstructor` at `id`.
    Promise {
        /// Id of the constructor node.
        id: RefId,
        /// Future resolving to the settlement outcome.
        future: PromiseFuture,
    },
    /// A stream consumption bound to the `ReadableStreamConstructor` at
    /// `id`. `recorded` replays events that happened before the parse.
    Stream {
        /// Id of the constructor node.
        id: RefId,
        /// Live source, when the stream still has one.
        source: Option<StreamSource>,
        /// Events recorded before the parse took the source.
        recorded: Vec<StreamMessage>,
    },
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promise { id, .. } => write!(f, "PendingTask::Promise({id})"),
            Self::Stream { id, .. } => write!(f, "PendingTask::Stream({id})"),
        }
    }
}
