//! Pipe identifiers and the unit behavior trait.
//!
//! A pipe is one node in a [`Rack`](crate::rack::Rack): the rack owns the
//! connection lists, the buffer cache and the block-time bookkeeping, while
//! the pipe's [`Unit`] supplies the behavior: how a block is transformed,
//! how skipped blocks are accounted, and how cached output is delivered to
//! each sink.

use core::any::Any;

use crate::buffer::Buffer;

/// Unique identifier for a pipe in a rack.
///
/// Identifiers are assigned sequentially and never reused within a rack
/// instance, so a stale id of a removed pipe can never alias a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeId(pub(crate) u32);

impl PipeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for PipeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PipeId({})", self.0)
    }
}

/// Behavior of a pipe: block transformation and scheduling hooks.
///
/// The rack calls [`process`](Unit::process) at most once per block time,
/// with a cache of already-populated input buffers to transform in place.
/// Everything else has a default that suits a plain 1-in/1-out unit.
pub trait Unit: Any + Send {
    /// Maximum number of source connections. Fixed when the unit is added
    /// to a rack.
    fn source_capacity(&self) -> usize {
        1
    }

    /// Maximum number of sink connections. Fixed when the unit is added to
    /// a rack.
    fn sink_capacity(&self) -> usize {
        1
    }

    /// Transforms the input buffers in place. `buffers[i]` holds the block
    /// pulled from source `i`; slots beyond the source count are zeroed.
    /// Runs on the audio thread: no allocation, blocking or I/O.
    fn process(&mut self, buffers: &mut [Buffer]);

    /// Called instead of [`process`](Unit::process) when no sink needs
    /// output this block, so stateful units can account for the samples
    /// that were never rendered.
    fn skip(&mut self, samples: usize) {
        let _ = samples;
    }

    /// Delivers this pipe's cached result to the sink at `sink_index`.
    /// The default copies the matching cache slot, or silence when the
    /// cache has no slot for that sink. Splitters override this to fan a
    /// single slot out to every sink.
    fn write_output(&mut self, cache: &[Buffer], output: &mut Buffer, sink_index: usize) {
        match cache.get(sink_index) {
            Some(buffer) => output.copy_from(buffer),
            None => output.clear(),
        }
    }

    /// Short-circuit answer to "does this pipe require output from its
    /// sources?", bypassing the downstream requirement scan entirely.
    /// Boundary sinks use this to report their active flag; everything
    /// else returns `None` and lets demand propagate.
    fn output_gate(&self) -> Option<bool> {
        None
    }

    /// Maps the propagated downstream requirement into this pipe's input
    /// requirement. Op-holding pipes route this through their op so an
    /// effect with a tail keeps requesting input while it decays.
    fn input_required(&mut self, output_required: bool) -> bool {
        output_required
    }
}
