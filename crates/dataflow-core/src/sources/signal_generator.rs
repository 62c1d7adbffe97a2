//! Signal generator: a native source filter that synthesizes a periodic
//! waveform sample-by-sample.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::batch::Batch;
use crate::dispatch::TransformKind;
use crate::dtype::Dtype;
use crate::error::{DataflowError, Result};
use crate::node::Filter;

/// The periodic waveform a [`SignalGenerator`] synthesizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// `sign(sin(theta))`.
    Square,
    /// `sin(theta)`.
    Sine,
    /// Triangle wave derived from `asin(sin(theta))`.
    Triangle,
    /// Linear ramp from -1 to 1, wrapping every period.
    Sawtooth,
}

impl Waveform {
    fn sample(self, frequency: f64, sample_index: f64, phase: f64) -> f64 {
        let theta = 2.0 * PI * frequency * sample_index + phase;
        match self {
            Waveform::Sine => theta.sin(),
            Waveform::Square => {
                let s = theta.sin();
                if s == 0.0 { 0.0 } else { s.signum() }
            }
            Waveform::Triangle => (2.0 / PI) * theta.sin().asin(),
            Waveform::Sawtooth => {
                let x = frequency * sample_index + phase;
                2.0 * x.rem_euclid(1.0) - 1.0
            }
        }
    }
}

/// A source filter (input arity zero) that emits successive batches of a
/// synthesized waveform at `f32` precision.
///
/// `SignalGenerator` wraps a [`Filter`] and derefs to it, so `start`,
/// `stop`, `connect` and friends apply directly to the underlying node.
pub struct SignalGenerator {
    filter: Filter,
}

impl SignalGenerator {
    /// Builds a signal generator.
    ///
    /// `batch_size` samples are produced per worker iteration; it must be
    /// nonzero and no larger than the batch capacity implied by
    /// `capacity_exp`.
    ///
    /// # Errors
    /// Returns [`DataflowError::Configuration`] if `capacity_exp` is out
    /// of range or `batch_size` is zero or exceeds the batch capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        waveform: Waveform,
        frequency: f64,
        amplitude: f64,
        phase: f64,
        x_offset: f64,
        capacity_exp: u32,
        batch_size: usize,
    ) -> Result<Self> {
        let capacity = 1usize
            .checked_shl(capacity_exp)
            .ok_or_else(|| DataflowError::Configuration(format!("capacity_exp {capacity_exp} overflows usize")))?;
        if batch_size == 0 || batch_size > capacity {
            return Err(DataflowError::Configuration(format!(
                "batch_size {batch_size} must be nonzero and at most the batch capacity {capacity}"
            )));
        }
        let next_sample_index = Arc::new(AtomicU64::new(0));
        let generator_state = Arc::clone(&next_sample_index);
        let transform = move |_inputs: &[Batch], outputs: &mut [Batch]| {
            let Some(output) = outputs.first_mut() else { return };
            let start = generator_state.fetch_add(batch_size as u64, Ordering::Relaxed);
            let Some(samples) = output.as_f32_mut() else { return };
            for (k, sample) in samples.iter_mut().take(batch_size).enumerate() {
                let index = (start + k as u64) as f64;
                *sample = (amplitude * waveform.sample(frequency, index, phase) + x_offset) as f32;
            }
            output
                .set_used_len(batch_size)
                .expect("batch_size <= capacity is validated at construction");
        };
        let filter = Filter::new_raw(Dtype::Float32, capacity_exp, 0, 1, TransformKind::Native(Box::new(transform)))?;
        Ok(Self { filter })
    }
}

impl std::ops::Deref for SignalGenerator {
    type Target = Filter;

    fn deref(&self) -> &Self::Target {
        &self.filter
    }
}
