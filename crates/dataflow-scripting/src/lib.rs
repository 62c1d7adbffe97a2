//! Hosted transform backends for `dataflow-core` filters.
//!
//! [`RhaiTransform`] is the default, dependency-free embedded scripting
//! backend. [`PyTransform`] (behind the `python` feature) hosts a Python
//! callable instead, for deployments that already standardize on Python
//! for operator-authored transforms.

pub mod error;
pub mod rhai_transform;

#[cfg(feature = "python")]
pub mod py_transform;

pub use error::ScriptError;
pub use rhai_transform::RhaiTransform;

#[cfg(feature = "python")]
pub use py_transform::PyTransform;
