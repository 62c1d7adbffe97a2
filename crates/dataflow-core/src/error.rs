//! Error types returned by the dataflow runtime.

use thiserror::Error;

use crate::dtype::Dtype;

/// Errors raised by filter-graph construction and lifecycle operations.
///
/// These are construction-time and control-plane errors. Data-plane problems
/// (a hosted transform raising, a sink overflowing its budget) are not raised
/// as errors — they are counted. See [`crate::node::Filter::user_failures`]
/// and the aggregator's drop counters.
#[derive(Debug, Error)]
pub enum DataflowError {
    /// A producer filter and a sink filter declared different sample types.
    #[error("dtype mismatch: producer carries {producer:?}, sink input expects {sink:?}")]
    DtypeMismatch {
        /// Dtype of the producer side of the attempted connection.
        producer: Dtype,
        /// Dtype the sink's input buffer was constructed with.
        sink: Dtype,
    },

    /// An operation was attempted from a lifecycle state that forbids it.
    #[error("filter {filter_id} is {state}; this operation requires {expected}")]
    InvalidState {
        /// Identity of the filter the operation was attempted on.
        filter_id: u64,
        /// The state the filter was actually in.
        state: &'static str,
        /// The state (or states) the operation required.
        expected: &'static str,
    },

    /// A connection between the same producer output and sink input already exists.
    #[error("filter {filter_id} output is already connected to that sink input")]
    Duplicate {
        /// Identity of the producer filter.
        filter_id: u64,
    },

    /// `disconnect` named a sink that is not currently registered.
    #[error("filter {filter_id} has no such sink registered")]
    NotFound {
        /// Identity of the producer filter.
        filter_id: u64,
    },

    /// An attempt was made to use a buffer or filter after it was closed.
    #[error("buffer is closed")]
    Closed,

    /// A constructor argument was out of range or otherwise invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Convenience alias for fallible dataflow operations.
pub type Result<T> = std::result::Result<T, DataflowError>;
