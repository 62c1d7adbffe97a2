//! Sample types carried by filter buffers.

/// The scalar sample type a filter and its buffers carry.
///
/// A filter declares exactly one dtype at construction; every buffer it
/// owns (inputs) and every batch it produces (outputs) carries that dtype.
/// There is no per-sample type erasure at the buffer boundary — the
/// [`crate::batch::Batch`] enum carries the dtype tag instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// 32-bit IEEE-754 floating point samples.
    Float32,
    /// 32-bit signed integer samples.
    Int32,
    /// 32-bit unsigned integer samples.
    Uint32,
}

impl Dtype {
    /// Size in bytes of one sample of this dtype.
    ///
    /// All three dtypes are 32-bit today; this exists so budget arithmetic
    /// (see [`crate::sinks::aggregator::Aggregator`]) never hardcodes `4`.
    #[must_use]
    pub const fn sample_size(self) -> usize {
        4
    }
}
