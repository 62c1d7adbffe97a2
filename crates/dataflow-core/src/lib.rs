//! Core dataflow runtime: typed ring buffers, threaded filter nodes,
//! transform dispatch, and the built-in sink/source filter types.
//!
//! A dataflow graph is a set of [`node::Filter`] nodes wired together by
//! [`node::Filter::connect`]. Each filter owns a dedicated worker thread
//! (spawned by [`node::Filter::start`]) that reads its input buffers,
//! invokes its transform, and fans the result out to every registered
//! sink. See [`dispatch`] for how native and hosted transforms differ,
//! and [`sinks`]/[`sources`] for the built-in terminal and initial node
//! types.

pub mod batch;
pub mod buffer;
pub mod dispatch;
pub mod dtype;
pub mod error;
pub mod node;
pub mod sinks;
pub mod sources;

pub use batch::Batch;
pub use buffer::{GetResult, Policy, PutOutcome, TypedBatchBuffer};
pub use dispatch::{ExecutionToken, HostedTransform, TransformKind};
pub use dtype::Dtype;
pub use error::{DataflowError, Result};
pub use node::{Filter, LifecycleState};
