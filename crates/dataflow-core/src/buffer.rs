//! The bounded, typed, single-producer/single-consumer batch buffer.
//!
//! Every filter input is one of these. Ownership sits with the downstream
//! (consuming) filter; upstream filters hold only a shared handle obtained
//! through [`crate::node::Filter::connect`].

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::batch::Batch;
use crate::dtype::Dtype;
use crate::error::DataflowError;

/// What a producer does when a sink's buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Block the producer until a slot frees up. Applies backpressure.
    Block,
    /// Drop the batch immediately rather than block. Backpressure-free.
    Drop,
}

/// Outcome of a non-blocking delivery attempt ([`TypedBatchBuffer::try_put`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The batch was accepted into a free slot.
    Accepted,
    /// The buffer was full; the batch was dropped.
    WouldBlock,
    /// The buffer was already closed; the batch was dropped.
    Closed,
}

/// Outcome of [`TypedBatchBuffer::get`].
#[derive(Debug)]
pub enum GetResult {
    /// A batch was available.
    Batch(Batch),
    /// The buffer is closed and drained: no more batches will ever arrive.
    Eos,
}

struct State {
    slots: VecDeque<Batch>,
    closed: bool,
}

/// A bounded ring of fixed-capacity [`Batch`] slots with blocking and
/// non-blocking put, blocking get, and explicit close/EOS semantics.
///
/// Locking follows the pool discipline this crate was grounded on: the
/// lock is only ever held for the queue manipulation itself, never across
/// a condvar wait longer than necessary, and never while a caller holds
/// one of the `Batch` values it produced.
pub struct TypedBatchBuffer {
    dtype: Dtype,
    batch_capacity: usize,
    slot_count: usize,
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    dropped: std::sync::atomic::AtomicU64,
    producers: std::sync::atomic::AtomicUsize,
}

impl TypedBatchBuffer {
    /// The minimum number of slots a buffer may be constructed with.
    pub const MIN_SLOTS: usize = 2;

    /// Creates a new, empty, open buffer.
    ///
    /// `slot_count` is clamped up to [`Self::MIN_SLOTS`] so a buffer can
    /// always hold at least one in-flight batch plus one being filled.
    #[must_use]
    pub fn new(dtype: Dtype, batch_capacity: usize, slot_count: usize) -> Self {
        let slot_count = slot_count.max(Self::MIN_SLOTS);
        Self {
            dtype,
            batch_capacity,
            slot_count,
            state: Mutex::new(State { slots: VecDeque::with_capacity(slot_count), closed: false }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
            producers: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// The dtype every batch passing through this buffer carries.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// The fixed sample capacity of every batch this buffer carries.
    #[must_use]
    pub const fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Blocks until a slot is free or the buffer is closed, then enqueues.
    ///
    /// # Errors
    /// Returns [`DataflowError::Closed`] if the buffer is already closed.
    pub fn put(&self, batch: Batch) -> Result<(), DataflowError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(DataflowError::Closed);
            }
            if state.slots.len() < self.slot_count {
                state.slots.push_back(batch);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Attempts to enqueue without blocking.
    ///
    /// On a full buffer, increments the drop counter and returns
    /// [`PutOutcome::WouldBlock`] without retrying.
    pub fn try_put(&self, batch: Batch) -> PutOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return PutOutcome::Closed;
        }
        if state.slots.len() < self.slot_count {
            state.slots.push_back(batch);
            drop(state);
            self.not_empty.notify_one();
            PutOutcome::Accepted
        } else {
            drop(state);
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            PutOutcome::WouldBlock
        }
    }

    /// Blocks until a batch is available or the buffer is closed and
    /// drained.
    pub fn get(&self) -> GetResult {
        let mut state = self.state.lock();
        loop {
            if let Some(batch) = state.slots.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return GetResult::Batch(batch);
            }
            if state.closed {
                return GetResult::Eos;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Marks the buffer closed, waking any blocked producer or consumer.
    /// Already-queued batches remain available to `get` until drained.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Whether the buffer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of batches dropped by [`Self::try_put`] because the buffer
    /// was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Registers one more producer for this buffer, taken when a `connect`
    /// wires an upstream output into this buffer as its sink.
    pub(crate) fn add_producer(&self) {
        self.producers.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    /// Removes one producer registration without affecting the closed
    /// state. Used by `disconnect`, which is only legal before a filter
    /// has ever run, so there is nothing to drain or wake yet.
    pub(crate) fn remove_producer(&self) {
        self.producers.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }

    /// Removes one producer registration as part of a producer filter's
    /// worker exiting. If this was the last producer, closes the buffer.
    pub(crate) fn release_producer_on_exit(&self) {
        let previous = self.producers.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        if previous == 1 {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let buf = TypedBatchBuffer::new(Dtype::Float32, 4, 2);
        let batch = Batch::empty(Dtype::Float32, 4);
        buf.put(batch).expect("open buffer accepts put");
        match buf.get() {
            GetResult::Batch(b) => assert_eq!(b.capacity(), 4),
            GetResult::Eos => panic!("expected a batch"),
        }
    }

    #[test]
    fn closed_buffer_drains_then_reports_eos() {
        let buf = TypedBatchBuffer::new(Dtype::Int32, 4, 2);
        buf.put(Batch::empty(Dtype::Int32, 4)).expect("accepted");
        buf.close();
        assert!(matches!(buf.get(), GetResult::Batch(_)));
        assert!(matches!(buf.get(), GetResult::Eos));
    }

    #[test]
    fn put_after_close_errors() {
        let buf = TypedBatchBuffer::new(Dtype::Uint32, 4, 2);
        buf.close();
        assert!(matches!(buf.put(Batch::empty(Dtype::Uint32, 4)), Err(DataflowError::Closed)));
    }

    #[test]
    fn try_put_drops_when_full_and_counts_it() {
        let buf = TypedBatchBuffer::new(Dtype::Float32, 1, 2);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::Accepted);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::Accepted);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::WouldBlock);
        assert_eq!(buf.dropped(), 1);
    }

    #[test]
    fn min_slot_count_is_enforced() {
        let buf = TypedBatchBuffer::new(Dtype::Float32, 1, 0);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::Accepted);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::Accepted);
        assert_eq!(buf.try_put(Batch::empty(Dtype::Float32, 1)), PutOutcome::WouldBlock);
    }

    #[test]
    fn last_producer_exit_closes_buffer() {
        let buf = TypedBatchBuffer::new(Dtype::Float32, 1, 2);
        buf.add_producer();
        buf.add_producer();
        buf.release_producer_on_exit();
        assert!(!buf.is_closed());
        buf.release_producer_on_exit();
        assert!(buf.is_closed());
    }
}
