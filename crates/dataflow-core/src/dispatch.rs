//! Transform dispatch: native Rust closures versus hosted (embedded
//! scripting layer) callables.
//!
//! Native transforms run directly on the filter's own worker thread with
//! no additional synchronization. Hosted transforms run under a single,
//! process-wide [`ExecutionToken`] — the same discipline CPython's GIL or
//! an interpreter-global lock gives a scripting backend: only one hosted
//! call executes anywhere in the process at a time, regardless of how many
//! filter worker threads exist.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::batch::Batch;

/// The process-wide execution token hosted transforms serialize on.
///
/// Modeled on an embedded interpreter's global lock: a scripting engine
/// (Rhai's `Scope`, a Python interpreter state) is not safely callable from
/// two threads at once, so every [`HostedTransform::call`] is made to
/// acquire this token first, turning concurrent filter workers with hosted
/// transforms into a single logical stream of calls.
pub struct ExecutionToken {
    lock: Mutex<()>,
}

impl ExecutionToken {
    fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// The single process-wide token.
    #[must_use]
    pub fn global() -> &'static ExecutionToken {
        static TOKEN: OnceLock<ExecutionToken> = OnceLock::new();
        TOKEN.get_or_init(ExecutionToken::new)
    }

    /// Runs `f` while holding the token. Blocks if another thread currently
    /// holds it.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        f()
    }
}

/// A transform implemented by an embedded scripting backend.
///
/// Implementors must be safe to call from whichever worker thread happens
/// to hold the [`ExecutionToken`] at the time — callers guarantee mutual
/// exclusion, not the implementation.
///
/// A call returning `Err` is a user script failure (a syntax error, a
/// raised exception, a type mismatch), not a runtime bug. The caller
/// forces every output batch to zero used-length and records the failure
/// as a count rather than surfacing a [`crate::error::DataflowError`] —
/// user code can err every batch indefinitely without that being a
/// construction-time or control-plane condition.
pub trait HostedTransform: Send + Sync {
    /// Executes one step: consumes `inputs`, writes into `outputs`.
    ///
    /// `outputs` arrives already capacity-allocated with used-length zero;
    /// the implementation writes into the full-capacity slices and calls
    /// [`Batch::set_used_len`] on whichever it fills.
    ///
    /// # Errors
    /// Returns the hosted error's rendered message on any failure raised
    /// by the underlying script/interpreter.
    fn call(&self, inputs: &[Batch], outputs: &mut [Batch]) -> Result<(), String>;
}

/// A filter's transform: either a native Rust closure or a hosted callable
/// dispatched through the [`ExecutionToken`].
pub enum TransformKind {
    /// Runs directly on the filter's worker thread.
    Native(Box<dyn FnMut(&[Batch], &mut [Batch]) + Send>),
    /// Runs under the global execution token.
    Hosted(Arc<dyn HostedTransform>),
}

impl TransformKind {
    /// Invokes the transform, returning `Err` with a human-readable
    /// message on a hosted-transform failure. Native transforms cannot
    /// fail through this interface — a native bug is a panic, not a
    /// recoverable error.
    pub(crate) fn invoke(&mut self, inputs: &[Batch], outputs: &mut [Batch]) -> Result<(), String> {
        match self {
            TransformKind::Native(f) => {
                f(inputs, outputs);
                Ok(())
            }
            TransformKind::Hosted(h) => ExecutionToken::global().with_lock(|| h.call(inputs, outputs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;

    struct AlwaysFails;
    impl HostedTransform for AlwaysFails {
        fn call(&self, _inputs: &[Batch], _outputs: &mut [Batch]) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[test]
    fn hosted_failure_is_surfaced_as_err_not_panic() {
        let mut kind = TransformKind::Hosted(Arc::new(AlwaysFails));
        let mut outputs = vec![Batch::empty(Dtype::Float32, 4)];
        let result = kind.invoke(&[], &mut outputs);
        assert_eq!(result, Err("boom".to_string()));
    }

    #[test]
    fn native_transform_runs_directly() {
        let mut kind = TransformKind::Native(Box::new(|_inputs: &[Batch], outputs: &mut [Batch]| {
            outputs[0].set_used_len(1).expect("capacity allows one");
        }));
        let mut outputs = vec![Batch::empty(Dtype::Float32, 4)];
        kind.invoke(&[], &mut outputs).expect("native never errs");
        assert_eq!(outputs[0].used_len(), 1);
    }
}
