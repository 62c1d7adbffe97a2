//! Aggregator: a sink that accumulates each input into a growable,
//! byte-budgeted contiguous array.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::Batch;
use crate::dtype::Dtype;
use crate::error::{DataflowError, Result};
use crate::node::{Filter, LifecycleState};

/// What happens when an input's accumulated array would exceed its byte
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep existing samples; drop as much of the incoming batch's tail as
    /// doesn't fit, incrementing that input's drop counter by the number
    /// of samples dropped.
    Reject,
    /// Discard the oldest samples to make room for the incoming batch.
    Roll,
}

#[derive(Clone)]
enum SampleArray {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
}

impl SampleArray {
    fn new(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Float32 => SampleArray::Float32(Vec::new()),
            Dtype::Int32 => SampleArray::Int32(Vec::new()),
            Dtype::Uint32 => SampleArray::Uint32(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            SampleArray::Float32(v) => v.len(),
            SampleArray::Int32(v) => v.len(),
            SampleArray::Uint32(v) => v.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            SampleArray::Float32(v) => v.clear(),
            SampleArray::Int32(v) => v.clear(),
            SampleArray::Uint32(v) => v.clear(),
        }
    }

    fn drop_front(&mut self, count: usize) {
        match self {
            SampleArray::Float32(v) => drop(v.drain(..count.min(v.len()))),
            SampleArray::Int32(v) => drop(v.drain(..count.min(v.len()))),
            SampleArray::Uint32(v) => drop(v.drain(..count.min(v.len()))),
        }
    }

    /// Appends `count` samples from the front of `batch`'s used prefix.
    fn extend_from_batch(&mut self, batch: &Batch, count: usize) {
        match (self, batch) {
            (SampleArray::Float32(v), Batch::Float32 { data, used }) => v.extend_from_slice(&data[..count.min(*used)]),
            (SampleArray::Int32(v), Batch::Int32 { data, used }) => v.extend_from_slice(&data[..count.min(*used)]),
            (SampleArray::Uint32(v), Batch::Uint32 { data, used }) => v.extend_from_slice(&data[..count.min(*used)]),
            _ => {}
        }
    }

    /// Appends `count` samples from the tail of `batch`'s used prefix.
    fn extend_from_batch_tail(&mut self, batch: &Batch, count: usize) {
        match (self, batch) {
            (SampleArray::Float32(v), Batch::Float32 { data, used }) => v.extend_from_slice(&data[used.saturating_sub(count)..*used]),
            (SampleArray::Int32(v), Batch::Int32 { data, used }) => v.extend_from_slice(&data[used.saturating_sub(count)..*used]),
            (SampleArray::Uint32(v), Batch::Uint32 { data, used }) => v.extend_from_slice(&data[used.saturating_sub(count)..*used]),
            _ => {}
        }
    }
}

/// Type-erased snapshot of one input's accumulated array, safe to hand
/// back to a caller outside the aggregator's lock.
#[derive(Debug, Clone)]
pub enum ArraySnapshot {
    /// Snapshot of an `f32` input array.
    Float32(Vec<f32>),
    /// Snapshot of an `i32` input array.
    Int32(Vec<i32>),
    /// Snapshot of a `u32` input array.
    Uint32(Vec<u32>),
}

impl From<&SampleArray> for ArraySnapshot {
    fn from(arr: &SampleArray) -> Self {
        match arr {
            SampleArray::Float32(v) => ArraySnapshot::Float32(v.clone()),
            SampleArray::Int32(v) => ArraySnapshot::Int32(v.clone()),
            SampleArray::Uint32(v) => ArraySnapshot::Uint32(v.clone()),
        }
    }
}

struct AggregatorState {
    arrays: Vec<SampleArray>,
    reject_drop_counts: Vec<u64>,
}

/// A sink filter (output arity zero) that accumulates every input into
/// its own growable array, enforcing a per-input byte budget.
///
/// `Aggregator` wraps a [`Filter`] the way the embedding API's other
/// built-in node types do — it derefs to it, so lifecycle and connection
/// calls (`start`, `stop`, `running`) apply directly. An aggregator is
/// always a sink, never a producer: it is the `sink` argument passed to
/// some other filter's `connect`, and never calls `connect` itself.
pub struct Aggregator {
    filter: Filter,
    state: Arc<Mutex<AggregatorState>>,
}

impl Aggregator {
    /// Builds an aggregator with `n_inputs` inputs of the given dtype,
    /// each budgeted to `max_capacity_bytes` before `overflow_policy`
    /// kicks in.
    ///
    /// # Errors
    /// Returns [`DataflowError::Configuration`] if `n_inputs` is zero,
    /// `max_capacity_bytes` is zero, or `capacity_exp` is out of range.
    pub fn new(
        dtype: Dtype,
        capacity_exp: u32,
        n_inputs: usize,
        max_capacity_bytes: usize,
        overflow_policy: OverflowPolicy,
    ) -> Result<Self> {
        if n_inputs == 0 {
            return Err(DataflowError::Configuration("aggregator needs at least one input".to_string()));
        }
        if max_capacity_bytes == 0 {
            return Err(DataflowError::Configuration("aggregator budget must be nonzero".to_string()));
        }
        let state = Arc::new(Mutex::new(AggregatorState {
            arrays: (0..n_inputs).map(|_| SampleArray::new(dtype)).collect(),
            reject_drop_counts: vec![0; n_inputs],
        }));
        let worker_state = Arc::clone(&state);
        let sample_size = dtype.sample_size();
        let max_samples = max_capacity_bytes / sample_size;
        let transform = move |inputs: &[Batch], _outputs: &mut [Batch]| {
            let mut guard = worker_state.lock();
            for (index, batch) in inputs.iter().enumerate() {
                let incoming = batch.used_len();
                if incoming == 0 {
                    continue;
                }
                let array = &mut guard.arrays[index];
                match overflow_policy {
                    OverflowPolicy::Reject => {
                        let free = max_samples.saturating_sub(array.len());
                        let accepted = incoming.min(free);
                        array.extend_from_batch(batch, accepted);
                        if accepted < incoming {
                            guard.reject_drop_counts[index] += (incoming - accepted) as u64;
                        }
                    }
                    OverflowPolicy::Roll => {
                        if incoming >= max_samples {
                            array.clear();
                            array.extend_from_batch_tail(batch, max_samples);
                        } else {
                            let free = max_samples.saturating_sub(array.len());
                            if free < incoming {
                                array.drop_front(incoming - free);
                            }
                            array.extend_from_batch(batch, incoming);
                        }
                    }
                }
            }
        };
        let filter = Filter::new_raw(dtype, capacity_exp, n_inputs, 0, crate::dispatch::TransformKind::Native(Box::new(transform)))?;
        Ok(Self { filter, state })
    }

    /// Snapshots of every input's accumulated array, in input order.
    #[must_use]
    pub fn arrays(&self) -> Vec<ArraySnapshot> {
        self.state.lock().arrays.iter().map(ArraySnapshot::from).collect()
    }

    /// Current sample count of every input's accumulated array, in input
    /// order.
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        self.state.lock().arrays.iter().map(SampleArray::len).collect()
    }

    /// Number of samples dropped by [`OverflowPolicy::Reject`] on each
    /// input over this aggregator's lifetime, in input order. Always zero
    /// for every input under [`OverflowPolicy::Roll`].
    #[must_use]
    pub fn reject_drop_counts(&self) -> Vec<u64> {
        self.state.lock().reject_drop_counts.clone()
    }

    /// Clears every input's accumulated array and drop counters.
    ///
    /// # Errors
    /// Returns [`DataflowError::InvalidState`] unless the aggregator is
    /// `Constructed` or `Stopped`.
    pub fn clear(&self) -> Result<()> {
        match self.filter.state() {
            LifecycleState::Constructed | LifecycleState::Stopped => {
                let mut guard = self.state.lock();
                for array in &mut guard.arrays {
                    array.clear();
                }
                for count in &mut guard.reject_drop_counts {
                    *count = 0;
                }
                Ok(())
            }
            state => Err(DataflowError::InvalidState {
                filter_id: self.filter.id(),
                state: state.label(),
                expected: "constructed or stopped",
            }),
        }
    }
}

impl std::ops::Deref for Aggregator {
    type Target = Filter;

    fn deref(&self) -> &Self::Target {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Policy;

    #[test]
    fn reject_policy_truncates_and_counts_drops() {
        let aggregator = Aggregator::new(Dtype::Float32, 4, 1, 2 * Dtype::Float32.sample_size(), OverflowPolicy::Reject)
            .expect("valid config");
        let source = Filter::passthrough(Dtype::Float32, 4).expect("valid");
        source.connect(&aggregator, 0, Policy::Block).expect("connect");

        let feed = source.input_handle(0).expect("arity 1");
        let mut batch = Batch::empty(Dtype::Float32, 4);
        batch.as_f32_mut().expect("float32").copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        batch.set_used_len(4).expect("capacity 4");
        feed.put(batch).expect("feed accepts");
        feed.close();

        source.start().expect("starts");
        source.stop().expect("drains");
        aggregator.start().expect("starts");
        aggregator.stop().expect("drains");

        assert_eq!(aggregator.sizes(), vec![2]);
        assert_eq!(aggregator.reject_drop_counts(), vec![2]);
    }

    #[test]
    fn roll_policy_keeps_newest_samples() {
        let aggregator =
            Aggregator::new(Dtype::Int32, 4, 1, 2 * Dtype::Int32.sample_size(), OverflowPolicy::Roll).expect("valid config");
        let source = Filter::passthrough(Dtype::Int32, 4).expect("valid");
        source.connect(&aggregator, 0, Policy::Block).expect("connect");

        let feed = source.input_handle(0).expect("arity 1");
        let mut batch = Batch::empty(Dtype::Int32, 4);
        batch.as_i32_mut().expect("int32").copy_from_slice(&[1, 2, 3, 4]);
        batch.set_used_len(4).expect("capacity 4");
        feed.put(batch).expect("feed accepts");
        feed.close();

        source.start().expect("starts");
        source.stop().expect("drains");
        aggregator.start().expect("starts");
        aggregator.stop().expect("drains");

        match &aggregator.arrays()[0] {
            ArraySnapshot::Int32(values) => assert_eq!(values, &[3, 4]),
            _ => panic!("expected int32 snapshot"),
        }
        assert_eq!(aggregator.reject_drop_counts(), vec![0]);
    }

    #[test]
    fn clear_rejected_while_running() {
        let aggregator = Aggregator::new(Dtype::Float32, 4, 1, 16, OverflowPolicy::Reject).expect("valid config");
        aggregator.start().expect("starts");
        assert!(aggregator.clear().is_err());
        aggregator.stop().expect("stops");
        aggregator.clear().expect("clear after stop succeeds");
    }
}
