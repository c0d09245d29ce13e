//! Fixed-size audio sample blocks.
//!
//! A [`Buffer`] is one block of single-precision samples tagged with the
//! sample rate it was rendered at. Buffers never reallocate after
//! construction: the pull scheduler relies on a buffer's size and rate
//! staying fixed for its whole lifetime, and replaces buffers wholesale
//! when a configuration change makes them incompatible.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

/// A fixed-size block of single-precision audio samples.
///
/// Two buffers are *compatible* when both their sample rate and their size
/// match. Copy and accumulate operations require compatible operands; that
/// precondition is the caller's to uphold and is only checked in debug
/// builds.
pub struct Buffer {
    data: Vec<f32>,
    sample_rate: f32,
}

impl Buffer {
    /// Creates a zeroed buffer.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is not at least 1.0 or `size` is zero.
    pub fn new(sample_rate: f32, size: usize) -> Self {
        assert!(
            sample_rate >= 1.0 && size > 0,
            "buffer requires a positive sample rate and size"
        );
        Self {
            data: vec![0.0; size],
            sample_rate,
        }
    }

    /// Creates a new zeroed buffer with this buffer's rate and size.
    pub fn like(&self) -> Self {
        Self::new(self.sample_rate, self.data.len())
    }

    /// Returns true when `other` has the same sample rate and size.
    #[inline]
    pub fn is_compatible(&self, other: &Buffer) -> bool {
        self.sample_rate == other.sample_rate && self.data.len() == other.data.len()
    }

    /// Returns the sample rate this block was rendered at.
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Returns the number of samples in the block.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the sample data.
    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the sample data mutably.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Fills the block with zeros.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Copies `source` into this buffer. The source must be compatible.
    pub fn copy_from(&mut self, source: &Buffer) {
        debug_assert!(self.is_compatible(source));
        self.data.copy_from_slice(&source.data);
    }

    /// Adds `source` into this buffer sample-by-sample. The source must be
    /// compatible.
    pub fn add_from(&mut self, source: &Buffer) {
        debug_assert!(self.is_compatible(source));
        for (dst, src) in self.data.iter_mut().zip(source.data.iter()) {
            *dst += *src;
        }
    }

    /// Mixes `sources` into this buffer: copy the first, add the rest.
    /// An empty source list clears the buffer.
    pub fn mix_from(&mut self, sources: &[Buffer]) {
        match sources.split_first() {
            None => self.clear(),
            Some((first, rest)) => {
                self.copy_from(first);
                for source in rest {
                    self.add_from(source);
                }
            }
        }
    }
}
