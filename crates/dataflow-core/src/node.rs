//! The filter node: a dedicated worker thread driven by a transform,
//! reading from its own input buffers and fanning its outputs out to
//! registered sinks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::batch::Batch;
use crate::buffer::{GetResult, Policy, PutOutcome, TypedBatchBuffer};
use crate::dispatch::TransformKind;
use crate::dtype::Dtype;
use crate::error::{DataflowError, Result};

/// Default number of slots per input buffer: enough for a producer to
/// fill one slot while a consumer drains the other. The embedding API
/// does not expose slot count as a constructor parameter, so every input
/// buffer in this crate uses this default.
const DEFAULT_SLOT_COUNT: usize = TypedBatchBuffer::MIN_SLOTS;

/// Smallest legal `capacity_exp`. 0 is rejected outright rather than
/// accepted as a single-sample batch.
const MIN_CAPACITY_EXP: u32 = 1;

/// Largest legal `capacity_exp`. 2^24 samples per batch is already far
/// beyond any sane transform step; the ceiling exists only to reject
/// obvious misconfiguration (e.g. a caller passing a byte count instead
/// of an exponent).
const MAX_CAPACITY_EXP: u32 = 24;

/// A filter's lifecycle state. See module docs on [`Filter`] for the
/// legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but never started. Connections may be made or broken.
    Constructed,
    /// Worker thread running.
    Running,
    /// `stop` has been requested; the worker is draining and exiting.
    Stopping,
    /// Worker thread has exited. Connections may be made or broken, but
    /// the filter cannot be restarted.
    Stopped,
}

impl LifecycleState {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }
}

struct SinkEntry {
    buffer: Arc<TypedBatchBuffer>,
    policy: Policy,
    sink_id: u64,
}

struct FilterInner {
    id: u64,
    dtype: Dtype,
    capacity: usize,
    inputs: Vec<Arc<TypedBatchBuffer>>,
    /// One ordered sink list per output slot.
    sinks: Mutex<Vec<Vec<SinkEntry>>>,
    transform: Mutex<Option<TransformKind>>,
    state: Mutex<LifecycleState>,
    stop_requested: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    user_failures: AtomicU64,
}

/// A node in the dataflow graph: a transform plus the input buffers and
/// sink registrations that surround it.
///
/// `Filter` is a cheap `Clone`-able handle (an `Arc` wrapper), the same way
/// this crate's buffer pool wraps its inner state — clone freely to share
/// one filter between the thread that constructs the graph and the worker
/// thread that runs it.
///
/// Lifecycle: `Constructed` → `Running` → `Stopping` → `Stopped`. Sink
/// connections may only be changed while not `Running`. A filter that has
/// reached `Stopped` cannot be started again — see [`Filter::start`].
#[derive(Clone)]
pub struct Filter {
    inner: Arc<FilterInner>,
}

fn next_filter_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl Filter {
    /// Builds a filter around a native Rust transform closure.
    ///
    /// # Errors
    /// Returns [`DataflowError::Configuration`] if `capacity_exp` is out
    /// of range.
    pub fn native(
        dtype: Dtype,
        capacity_exp: u32,
        input_arity: usize,
        output_arity: usize,
        transform: impl FnMut(&[Batch], &mut [Batch]) + Send + 'static,
    ) -> Result<Self> {
        Self::new_raw(dtype, capacity_exp, input_arity, output_arity, TransformKind::Native(Box::new(transform)))
    }

    /// Builds a filter around a hosted (embedded scripting layer)
    /// transform, with the single-input/single-output arity every
    /// embedding-API filter uses.
    ///
    /// # Errors
    /// Returns [`DataflowError::Configuration`] if `capacity_exp` is out
    /// of range.
    pub fn hosted(dtype: Dtype, capacity_exp: u32, transform: Arc<dyn crate::dispatch::HostedTransform>) -> Result<Self> {
        Self::new_raw(dtype, capacity_exp, 1, 1, TransformKind::Hosted(transform))
    }

    /// Builds a single-input/single-output filter that copies its input's
    /// used prefix to its output unchanged. The base case every other
    /// native filter specializes.
    ///
    /// # Errors
    /// Returns [`DataflowError::Configuration`] if `capacity_exp` is out
    /// of range.
    pub fn passthrough(dtype: Dtype, capacity_exp: u32) -> Result<Self> {
        Self::native(dtype, capacity_exp, 1, 1, move |inputs: &[Batch], outputs: &mut [Batch]| {
            if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
                // Arity is fixed to 1/1 by this constructor; a dtype
                // mismatch here would mean the buffer layer let an
                // incompatible connection through.
                let _ = input.copy_used_into(output);
            }
        })
    }

    /// General constructor used by the embedding-level wrappers
    /// ([`crate::sinks::aggregator::Aggregator`],
    /// [`crate::sources::signal_generator::SignalGenerator`]) that need
    /// arities the public constructors above don't expose directly.
    pub(crate) fn new_raw(
        dtype: Dtype,
        capacity_exp: u32,
        input_arity: usize,
        output_arity: usize,
        transform: TransformKind,
    ) -> Result<Self> {
        if !(MIN_CAPACITY_EXP..=MAX_CAPACITY_EXP).contains(&capacity_exp) {
            return Err(DataflowError::Configuration(format!(
                "capacity_exp {capacity_exp} out of range [{MIN_CAPACITY_EXP}, {MAX_CAPACITY_EXP}]"
            )));
        }
        let capacity = 1usize << capacity_exp;
        let inputs = (0..input_arity).map(|_| Arc::new(TypedBatchBuffer::new(dtype, capacity, DEFAULT_SLOT_COUNT))).collect();
        let sinks = (0..output_arity).map(|_| Vec::new()).collect();
        Ok(Self {
            inner: Arc::new(FilterInner {
                id: next_filter_id(),
                dtype,
                capacity,
                inputs,
                sinks: Mutex::new(sinks),
                transform: Mutex::new(Some(transform)),
                state: Mutex::new(LifecycleState::Constructed),
                stop_requested: AtomicBool::new(false),
                worker: Mutex::new(None),
                user_failures: AtomicU64::new(0),
            }),
        })
    }

    /// A process-unique identity for this filter, stable for its lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The dtype this filter's buffers and batches carry.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        self.inner.dtype
    }

    /// Number of input slots this filter was constructed with.
    #[must_use]
    pub fn input_arity(&self) -> usize {
        self.inner.inputs.len()
    }

    /// Number of output slots this filter was constructed with.
    #[must_use]
    pub fn output_arity(&self) -> usize {
        self.inner.sinks.lock().len()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// Whether the worker thread is currently running.
    #[must_use]
    pub fn running(&self) -> bool {
        matches!(self.state(), LifecycleState::Running)
    }

    /// Count of hosted-transform failures recorded over this filter's
    /// lifetime. Native transforms never contribute to this counter —
    /// a native bug is a panic, not a counted failure.
    #[must_use]
    pub fn user_failures(&self) -> u64 {
        self.inner.user_failures.load(Ordering::Relaxed)
    }

    /// Handle to one of this filter's input buffers, used by an upstream
    /// filter's `connect` to register itself as a producer.
    pub(crate) fn input_handle(&self, index: usize) -> Option<Arc<TypedBatchBuffer>> {
        self.inner.inputs.get(index).cloned()
    }

    /// Registers `sink` to receive this filter's output slot 0.
    /// Equivalent to `connect_output(0, sink, input_index, policy)`; every
    /// builtin filter type has exactly one output slot, so this is the
    /// form the embedding API exposes directly.
    ///
    /// # Errors
    /// See [`Filter::connect_output`].
    pub fn connect(&self, sink: &Filter, input_index: usize, policy: Policy) -> Result<()> {
        self.connect_output(0, sink, input_index, policy)
    }

    /// Registers `sink`'s input `input_index` as a consumer of this
    /// filter's output slot `output_index`.
    ///
    /// # Errors
    /// - [`DataflowError::InvalidState`] if either filter is `Running` or
    ///   `Stopping`.
    /// - [`DataflowError::DtypeMismatch`] if the two filters' dtypes
    ///   differ.
    /// - [`DataflowError::Configuration`] if either index is out of range.
    /// - [`DataflowError::Duplicate`] if this exact connection already
    ///   exists.
    pub fn connect_output(&self, output_index: usize, sink: &Filter, input_index: usize, policy: Policy) -> Result<()> {
        self.require_not_running()?;
        sink.require_not_running()?;
        if self.inner.dtype != sink.inner.dtype {
            return Err(DataflowError::DtypeMismatch { producer: self.inner.dtype, sink: sink.inner.dtype });
        }
        let Some(target_buffer) = sink.input_handle(input_index) else {
            return Err(DataflowError::Configuration(format!(
                "input index {input_index} out of range for filter {} with input arity {}",
                sink.inner.id,
                sink.input_arity()
            )));
        };
        let mut sinks = self.inner.sinks.lock();
        let Some(slot) = sinks.get_mut(output_index) else {
            return Err(DataflowError::Configuration(format!(
                "output index {output_index} out of range for filter {} with output arity {}",
                self.inner.id,
                sinks.len()
            )));
        };
        if slot.iter().any(|entry| Arc::ptr_eq(&entry.buffer, &target_buffer)) {
            return Err(DataflowError::Duplicate { filter_id: self.inner.id });
        }
        target_buffer.add_producer();
        slot.push(SinkEntry { buffer: target_buffer, policy, sink_id: sink.inner.id });
        Ok(())
    }

    /// Removes a previously registered connection from output slot 0.
    ///
    /// # Errors
    /// See [`Filter::disconnect_output`].
    pub fn disconnect(&self, sink: &Filter, input_index: usize) -> Result<()> {
        self.disconnect_output(0, sink, input_index)
    }

    /// Removes a previously registered connection from output slot
    /// `output_index`.
    ///
    /// # Errors
    /// - [`DataflowError::InvalidState`] if either filter is `Running` or
    ///   `Stopping`.
    /// - [`DataflowError::NotFound`] if no such connection is registered.
    pub fn disconnect_output(&self, output_index: usize, sink: &Filter, input_index: usize) -> Result<()> {
        self.require_not_running()?;
        sink.require_not_running()?;
        let Some(target_buffer) = sink.input_handle(input_index) else {
            return Err(DataflowError::NotFound { filter_id: self.inner.id });
        };
        let mut sinks = self.inner.sinks.lock();
        let Some(slot) = sinks.get_mut(output_index) else {
            return Err(DataflowError::NotFound { filter_id: self.inner.id });
        };
        let before = slot.len();
        slot.retain(|entry| !Arc::ptr_eq(&entry.buffer, &target_buffer));
        if slot.len() == before {
            return Err(DataflowError::NotFound { filter_id: self.inner.id });
        }
        target_buffer.remove_producer();
        Ok(())
    }

    fn require_not_running(&self) -> Result<()> {
        let state = *self.inner.state.lock();
        match state {
            LifecycleState::Constructed | LifecycleState::Stopped => Ok(()),
            LifecycleState::Running | LifecycleState::Stopping => Err(DataflowError::InvalidState {
                filter_id: self.inner.id,
                state: state.label(),
                expected: "constructed or stopped",
            }),
        }
    }

    /// Spawns the worker thread and transitions to `Running`.
    ///
    /// # Errors
    /// Returns [`DataflowError::InvalidState`] unless the filter is
    /// currently `Constructed` — a filter that has ever been stopped
    /// cannot be restarted.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != LifecycleState::Constructed {
                return Err(DataflowError::InvalidState {
                    filter_id: self.inner.id,
                    state: state.label(),
                    expected: "constructed",
                });
            }
            *state = LifecycleState::Running;
        }
        let transform = self
            .inner
            .transform
            .lock()
            .take()
            .expect("transform is only taken once, guarded by the Constructed -> Running transition above");
        let filter = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("filter-{}", self.inner.id))
            .spawn(move || filter.run_worker(transform))
            .map_err(|e| DataflowError::Configuration(format!("failed to spawn worker thread: {e}")))?;
        *self.inner.worker.lock() = Some(handle);
        Ok(())
    }

    /// Requests shutdown: closes all input buffers (letting queued batches
    /// drain before EOS) and signals sourceless filters directly, then
    /// blocks until the worker thread has exited.
    ///
    /// Idempotent: calling `stop` on a filter that is already `Stopping`
    /// or `Stopped` returns immediately without blocking on the in-flight
    /// shutdown.
    ///
    /// # Errors
    /// Returns [`DataflowError::InvalidState`] if the filter was never
    /// started.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                LifecycleState::Stopped | LifecycleState::Stopping => return Ok(()),
                LifecycleState::Constructed => {
                    return Err(DataflowError::InvalidState {
                        filter_id: self.inner.id,
                        state: state.label(),
                        expected: "running",
                    })
                }
                LifecycleState::Running => *state = LifecycleState::Stopping,
            }
        }
        self.inner.stop_requested.store(true, Ordering::Release);
        for input in &self.inner.inputs {
            input.close();
        }
        if let Some(handle) = self.inner.worker.lock().take() {
            // A panic in a native transform is a programmer error per the
            // dispatch contract; propagate rather than swallow it.
            if handle.join().is_err() {
                tracing::error!(filter_id = self.inner.id, "worker thread panicked");
            }
        }
        *self.inner.state.lock() = LifecycleState::Stopped;
        Ok(())
    }

    fn run_worker(&self, mut transform: TransformKind) {
        tracing::debug!(filter_id = self.inner.id, "worker starting");
        loop {
            if self.inner.inputs.is_empty() && self.inner.stop_requested.load(Ordering::Acquire) {
                break;
            }

            let mut input_batches = Vec::with_capacity(self.inner.inputs.len());
            let mut eos = false;
            for input in &self.inner.inputs {
                match input.get() {
                    GetResult::Batch(batch) => input_batches.push(batch),
                    GetResult::Eos => {
                        eos = true;
                        break;
                    }
                }
            }
            if eos {
                break;
            }

            let output_count = self.inner.sinks.lock().len();
            let mut output_batches: Vec<Batch> = (0..output_count).map(|_| Batch::empty(self.inner.dtype, self.inner.capacity)).collect();

            if let Err(message) = transform.invoke(&input_batches, &mut output_batches) {
                self.inner.user_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(filter_id = self.inner.id, error = %message, "hosted transform failed; delivering empty output");
                for batch in &mut output_batches {
                    batch.clear();
                }
            }

            let sinks = self.inner.sinks.lock();
            for (slot, batch) in output_batches.into_iter().enumerate() {
                let Some(entries) = sinks.get(slot) else { continue };
                for entry in entries {
                    match entry.policy {
                        Policy::Block => {
                            if entry.buffer.put(batch.clone()).is_err() {
                                tracing::debug!(
                                    filter_id = self.inner.id,
                                    sink_id = entry.sink_id,
                                    "sink closed, dropping delivery"
                                );
                            }
                        }
                        Policy::Drop => {
                            if entry.buffer.try_put(batch.clone()) == PutOutcome::Closed {
                                tracing::debug!(
                                    filter_id = self.inner.id,
                                    sink_id = entry.sink_id,
                                    "sink closed, dropping delivery"
                                );
                            }
                        }
                    }
                }
            }
        }

        for slot in self.inner.sinks.lock().iter() {
            for entry in slot {
                entry.buffer.release_producer_on_exit();
            }
        }
        tracing::debug!(filter_id = self.inner.id, "worker exiting");
    }
}
