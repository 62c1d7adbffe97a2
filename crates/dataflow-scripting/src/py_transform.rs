//! Python-backed hosted transform, gated behind the `python` feature.
//!
//! Grounded directly on this crate's teacher's `PyO3Engine`: every call
//! acquires the interpreter via `Python::with_gil`, and a raised Python
//! exception is rendered (message plus traceback, when available) into a
//! [`ScriptError::RuntimeError`] rather than unwinding across the FFI
//! boundary.

use pyo3::types::{PyList, PyListMethods};
use pyo3::{Bound, Py, PyAny, PyErr, Python};

use dataflow_core::Batch;
use dataflow_core::HostedTransform;

use crate::error::ScriptError;

/// A hosted transform backed by a Python callable.
///
/// The callable is invoked as `callable(inputs)` where `inputs` is a list
/// of lists (one per input, each the input's used-length samples as
/// Python floats or ints), and must return a list of lists, one per
/// output.
pub struct PyTransform {
    callable: Py<PyAny>,
}

impl PyTransform {
    /// Wraps an existing Python callable.
    #[must_use]
    pub fn new(callable: Py<PyAny>) -> Self {
        Self { callable }
    }
}

fn batch_to_pylist<'py>(py: Python<'py>, batch: &Batch) -> Bound<'py, PyList> {
    match batch {
        Batch::Float32 { data, used } => PyList::new(py, &data[..*used]).expect("finite-length slice never fails to build"),
        Batch::Int32 { data, used } => PyList::new(py, &data[..*used]).expect("finite-length slice never fails to build"),
        Batch::Uint32 { data, used } => PyList::new(py, &data[..*used]).expect("finite-length slice never fails to build"),
    }
}

fn pylist_to_batch(value: &Bound<'_, PyAny>, output: &mut Batch) -> Result<(), ScriptError> {
    let list: &Bound<'_, PyList> = value
        .downcast()
        .map_err(|_| ScriptError::TypeConversionError("expected a list output".to_string()))?;
    let capacity = output.capacity();
    if list.len() > capacity {
        return Err(ScriptError::TypeConversionError(format!(
            "script produced {} samples, exceeding output capacity {capacity}",
            list.len()
        )));
    }
    match output {
        Batch::Float32 { data, .. } => {
            for (slot, item) in data.iter_mut().zip(list.iter()) {
                *slot = item
                    .extract::<f32>()
                    .map_err(|e| ScriptError::TypeConversionError(e.to_string()))?;
            }
        }
        Batch::Int32 { data, .. } => {
            for (slot, item) in data.iter_mut().zip(list.iter()) {
                *slot = item
                    .extract::<i32>()
                    .map_err(|e| ScriptError::TypeConversionError(e.to_string()))?;
            }
        }
        Batch::Uint32 { data, .. } => {
            for (slot, item) in data.iter_mut().zip(list.iter()) {
                *slot = item
                    .extract::<u32>()
                    .map_err(|e| ScriptError::TypeConversionError(e.to_string()))?;
            }
        }
    }
    output.set_used_len(list.len()).map_err(|e| ScriptError::TypeConversionError(e.to_string()))
}

fn convert_py_error(py: Python<'_>, err: &PyErr) -> ScriptError {
    let backtrace = err.traceback(py).and_then(|tb| tb.format().ok());
    ScriptError::RuntimeError { message: err.to_string(), backtrace }
}

impl HostedTransform for PyTransform {
    fn call(&self, inputs: &[Batch], outputs: &mut [Batch]) -> Result<(), String> {
        Python::with_gil(|py| {
            let py_inputs = PyList::new(py, inputs.iter().map(|batch| batch_to_pylist(py, batch)))
                .expect("finite-length input list never fails to build");
            let result = self
                .callable
                .call1(py, (py_inputs,))
                .map_err(|e| convert_py_error(py, &e).into_message())?;
            let bound = result.into_bound(py);
            let result_list: &Bound<'_, PyList> = bound
                .downcast()
                .map_err(|_| "python transform must return a list of lists".to_string())?;
            for (value, output) in result_list.iter().zip(outputs.iter_mut()) {
                pylist_to_batch(&value, output).map_err(ScriptError::into_message)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_core::Dtype;
    use pyo3::types::PyModule;
    use serial_test::serial;

    // `Python::with_gil`'s auto-initialized interpreter is one process-wide
    // resource; these tests run `#[serial]` so one test's imports and
    // globals can't leak into another's.

    fn doubling_callable(py: Python<'_>) -> Py<PyAny> {
        let module = PyModule::from_code(
            py,
            std::ffi::CString::new("def double(inputs):\n    return [[x * 2 for x in row] for row in inputs]\n")
                .expect("no interior nul"),
            std::ffi::CString::new("double.py").expect("no interior nul"),
            std::ffi::CString::new("double").expect("no interior nul"),
        )
        .expect("module compiles");
        module.getattr("double").expect("function defined").unbind()
    }

    #[test]
    #[serial]
    fn doubles_every_sample() {
        let callable = Python::with_gil(doubling_callable);
        let transform = PyTransform::new(callable);
        let mut input = Batch::empty(Dtype::Float32, 4);
        input.as_f32_mut().expect("float32").copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        input.set_used_len(4).expect("capacity 4");
        let mut outputs = vec![Batch::empty(Dtype::Float32, 4)];
        transform.call(&[input], &mut outputs).expect("script runs");
        assert_eq!(outputs[0].as_f32().expect("float32"), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    #[serial]
    fn raised_exception_is_surfaced_as_err() {
        let callable = Python::with_gil(|py| {
            let module = PyModule::from_code(
                py,
                std::ffi::CString::new("def fail(inputs):\n    raise ValueError('nope')\n").expect("no interior nul"),
                std::ffi::CString::new("fail.py").expect("no interior nul"),
                std::ffi::CString::new("fail").expect("no interior nul"),
            )
            .expect("module compiles");
            module.getattr("fail").expect("function defined").unbind()
        });
        let transform = PyTransform::new(callable);
        let mut outputs = vec![Batch::empty(Dtype::Float32, 4)];
        let result = transform.call(&[], &mut outputs);
        assert!(result.is_err());
    }
}
