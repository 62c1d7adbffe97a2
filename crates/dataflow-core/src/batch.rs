//! Fixed-capacity sample batches exchanged between filters.

use crate::dtype::Dtype;
use crate::error::{DataflowError, Result};

/// A fixed-capacity, contiguous batch of samples plus a used-length.
///
/// A batch always allocates its full capacity up front (at construction of
/// the owning buffer) and is reused by value as it travels through a
/// filter's worker loop. Transforms write into the full-capacity slice
/// returned by the `*_mut` accessors and then call [`Batch::set_used_len`]
/// to publish how many of those samples are valid; readers only ever see
/// the `0..used` prefix.
#[derive(Debug, Clone)]
pub enum Batch {
    /// A batch of `f32` samples.
    Float32 {
        /// Backing storage, length fixed at the batch's capacity.
        data: Vec<f32>,
        /// Number of valid leading samples in `data`.
        used: usize,
    },
    /// A batch of `i32` samples.
    Int32 {
        /// Backing storage, length fixed at the batch's capacity.
        data: Vec<i32>,
        /// Number of valid leading samples in `data`.
        used: usize,
    },
    /// A batch of `u32` samples.
    Uint32 {
        /// Backing storage, length fixed at the batch's capacity.
        data: Vec<u32>,
        /// Number of valid leading samples in `data`.
        used: usize,
    },
}

impl Batch {
    /// Allocates a zero-filled batch of the given dtype and capacity, with
    /// `used` set to zero.
    #[must_use]
    pub fn empty(dtype: Dtype, capacity: usize) -> Self {
        match dtype {
            Dtype::Float32 => Batch::Float32 { data: vec![0.0; capacity], used: 0 },
            Dtype::Int32 => Batch::Int32 { data: vec![0; capacity], used: 0 },
            Dtype::Uint32 => Batch::Uint32 { data: vec![0; capacity], used: 0 },
        }
    }

    /// The dtype this batch carries.
    #[must_use]
    pub const fn dtype(&self) -> Dtype {
        match self {
            Batch::Float32 { .. } => Dtype::Float32,
            Batch::Int32 { .. } => Dtype::Int32,
            Batch::Uint32 { .. } => Dtype::Uint32,
        }
    }

    /// Total sample capacity of this batch (fixed for its lifetime).
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self {
            Batch::Float32 { data, .. } => data.len(),
            Batch::Int32 { data, .. } => data.len(),
            Batch::Uint32 { data, .. } => data.len(),
        }
    }

    /// Number of valid leading samples.
    #[must_use]
    pub fn used_len(&self) -> usize {
        match self {
            Batch::Float32 { used, .. } => *used,
            Batch::Int32 { used, .. } => *used,
            Batch::Uint32 { used, .. } => *used,
        }
    }

    /// Sets the used-length. Errors if `len` exceeds capacity.
    pub fn set_used_len(&mut self, len: usize) -> Result<()> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(DataflowError::Configuration(format!(
                "used length {len} exceeds batch capacity {capacity}"
            )));
        }
        match self {
            Batch::Float32 { used, .. } | Batch::Int32 { used, .. } | Batch::Uint32 { used, .. } => {
                *used = len;
            }
        }
        Ok(())
    }

    /// Resets the batch to an empty (zero used-length) state. Capacity and
    /// contents of the unused tail are left untouched.
    pub fn clear(&mut self) {
        match self {
            Batch::Float32 { used, .. } | Batch::Int32 { used, .. } | Batch::Uint32 { used, .. } => {
                *used = 0;
            }
        }
    }

    /// The valid (used-length) `f32` slice, if this batch is `Float32`.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Batch::Float32 { data, used } => Some(&data[..*used]),
            _ => None,
        }
    }

    /// The full-capacity mutable `f32` slice, if this batch is `Float32`.
    ///
    /// Intended for transforms: write into the whole slice, then call
    /// [`Batch::set_used_len`] to publish how much of it is valid.
    #[must_use]
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Batch::Float32 { data, .. } => Some(data.as_mut_slice()),
            _ => None,
        }
    }

    /// The valid (used-length) `i32` slice, if this batch is `Int32`.
    #[must_use]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Batch::Int32 { data, used } => Some(&data[..*used]),
            _ => None,
        }
    }

    /// The full-capacity mutable `i32` slice, if this batch is `Int32`.
    #[must_use]
    pub fn as_i32_mut(&mut self) -> Option<&mut [i32]> {
        match self {
            Batch::Int32 { data, .. } => Some(data.as_mut_slice()),
            _ => None,
        }
    }

    /// The valid (used-length) `u32` slice, if this batch is `Uint32`.
    #[must_use]
    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Batch::Uint32 { data, used } => Some(&data[..*used]),
            _ => None,
        }
    }

    /// The full-capacity mutable `u32` slice, if this batch is `Uint32`.
    #[must_use]
    pub fn as_u32_mut(&mut self) -> Option<&mut [u32]> {
        match self {
            Batch::Uint32 { data, .. } => Some(data.as_mut_slice()),
            _ => None,
        }
    }

    /// Copies this batch's used prefix into `dest`, which must share this
    /// batch's dtype and have capacity at least this batch's `used_len`.
    /// Used by the identity (passthrough) native transform.
    pub fn copy_used_into(&self, dest: &mut Batch) -> Result<()> {
        match (self, &mut *dest) {
            (Batch::Float32 { data, used }, Batch::Float32 { data: dst, .. }) => {
                dst[..*used].copy_from_slice(&data[..*used]);
                dest.set_used_len(*used)
            }
            (Batch::Int32 { data, used }, Batch::Int32 { data: dst, .. }) => {
                dst[..*used].copy_from_slice(&data[..*used]);
                dest.set_used_len(*used)
            }
            (Batch::Uint32 { data, used }, Batch::Uint32 { data: dst, .. }) => {
                dst[..*used].copy_from_slice(&data[..*used]);
                dest.set_used_len(*used)
            }
            _ => Err(DataflowError::DtypeMismatch { producer: self.dtype(), sink: dest.dtype() }),
        }
    }
}
