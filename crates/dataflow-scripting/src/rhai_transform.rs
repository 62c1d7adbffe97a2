//! Rhai-backed hosted transform — the default embedded scripting layer.
//!
//! Grounded on this crate's teacher's own Rhai wrapper: one `Engine`
//! shared behind an `Arc`, one persistent `Scope` guarded by a `Mutex` so
//! state set by one call (e.g. a script-level accumulator) survives to
//! the next, and an operation-count ceiling so a runaway script can't
//! hang a filter's worker thread forever.

use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{Array, Dynamic, Engine, Scope, AST};

use dataflow_core::Batch;
use dataflow_core::HostedTransform;

use crate::error::ScriptError;

/// Default per-call operation ceiling. Generous for any reasonable
/// per-batch transform, low enough that an infinite-loop script fails
/// fast instead of wedging a worker thread.
const MAX_OPERATIONS: u64 = 1_000_000;

/// A hosted transform backed by a compiled Rhai script.
///
/// The script must define a function `transform(inputs)` that takes an
/// array of arrays (one per input, each the input's used-length samples
/// as floats or integers) and returns an array of arrays (one per
/// output). Returning fewer arrays than the filter has outputs leaves the
/// remaining outputs at zero used-length.
pub struct RhaiTransform {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    scope: Mutex<Scope<'static>>,
    function_name: String,
}

impl RhaiTransform {
    /// Compiles `source` and binds the call to `function_name`.
    ///
    /// # Errors
    /// Returns [`ScriptError::CompileError`] if `source` fails to parse.
    pub fn compile(source: &str, function_name: impl Into<String>) -> Result<Self, ScriptError> {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        let ast = engine.compile(source).map_err(|e| ScriptError::CompileError(e.to_string()))?;
        Ok(Self { engine: Arc::new(engine), ast: Arc::new(ast), scope: Mutex::new(Scope::new()), function_name: function_name.into() })
    }
}

fn batch_to_dynamic(batch: &Batch) -> Dynamic {
    let array: Array = match batch {
        Batch::Float32 { data, used } => data[..*used].iter().map(|&v| Dynamic::from_float(f64::from(v))).collect(),
        Batch::Int32 { data, used } => data[..*used].iter().map(|&v| Dynamic::from_int(i64::from(v))).collect(),
        Batch::Uint32 { data, used } => data[..*used].iter().map(|&v| Dynamic::from_int(i64::from(v))).collect(),
    };
    Dynamic::from_array(array)
}

fn dynamic_to_batch(value: &Dynamic, output: &mut Batch) -> Result<(), ScriptError> {
    let array = value
        .clone()
        .into_array()
        .map_err(|ty| ScriptError::TypeConversionError(format!("expected an array output, got {ty}")))?;
    let capacity = output.capacity();
    if array.len() > capacity {
        return Err(ScriptError::TypeConversionError(format!(
            "script produced {} samples, exceeding output capacity {capacity}",
            array.len()
        )));
    }
    match output {
        Batch::Float32 { data, .. } => {
            for (slot, value) in data.iter_mut().zip(array.iter()) {
                *slot = value
                    .as_float()
                    .map_err(|_| ScriptError::TypeConversionError("expected a float sample".to_string()))? as f32;
            }
        }
        Batch::Int32 { data, .. } => {
            for (slot, value) in data.iter_mut().zip(array.iter()) {
                *slot = value
                    .as_int()
                    .map_err(|_| ScriptError::TypeConversionError("expected an integer sample".to_string()))? as i32;
            }
        }
        Batch::Uint32 { data, .. } => {
            for (slot, value) in data.iter_mut().zip(array.iter()) {
                let as_int = value
                    .as_int()
                    .map_err(|_| ScriptError::TypeConversionError("expected an integer sample".to_string()))?;
                *slot = u32::try_from(as_int).unwrap_or(0);
            }
        }
    }
    output.set_used_len(array.len()).map_err(|e| ScriptError::TypeConversionError(e.to_string()))
}

impl HostedTransform for RhaiTransform {
    fn call(&self, inputs: &[Batch], outputs: &mut [Batch]) -> Result<(), String> {
        let mut scope = self.scope.lock();
        let call_args: Array = inputs.iter().map(batch_to_dynamic).collect();
        let result: Array = self
            .engine
            .call_fn(&mut scope, &self.ast, &self.function_name, (call_args,))
            .map_err(|e| {
                ScriptError::RuntimeError { message: e.to_string(), backtrace: None }.into_message()
            })?;
        for (value, output) in result.iter().zip(outputs.iter_mut()) {
            dynamic_to_batch(value, output).map_err(ScriptError::into_message)?;
        }
        Ok(())
    }
}
