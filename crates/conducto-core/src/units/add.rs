//! Fan-in summer.

use crate::buffer::Buffer;
use crate::pipe::Unit;

/// Sums every connected source into a single output.
///
/// With no sources connected the output is silence. Graph output
/// boundaries use an `Add` so any number of chains can mix into one
/// channel.
pub struct Add {
    source_capacity: usize,
}

impl Add {
    /// Creates a summer accepting up to 64 sources.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Creates a summer accepting up to `max_inputs` sources.
    pub fn with_capacity(max_inputs: usize) -> Self {
        Self {
            source_capacity: max_inputs,
        }
    }
}

impl Default for Add {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit for Add {
    fn source_capacity(&self) -> usize {
        self.source_capacity
    }

    fn sink_capacity(&self) -> usize {
        1
    }

    fn process(&mut self, buffers: &mut [Buffer]) {
        // Slot 0 already holds the first source (or silence); accumulate
        // the rest into it.
        if let Some((out, rest)) = buffers.split_first_mut() {
            for input in rest {
                out.add_from(input);
            }
        }
    }
}
