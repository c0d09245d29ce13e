//! Adapter from the external [`AudioOp`] contract to the pipe protocol.

use crate::buffer::Buffer;
use crate::op::AudioOp;
use crate::pipe::Unit;

/// Marks the skip counter inactive: the op saw an empty buffer list and
/// has nothing to compensate for until it is re-driven.
const INACTIVE: i64 = -1;

/// A pipe wrapping an [`AudioOp`].
///
/// Handles the op lifecycle so implementations stay pure transformers:
/// `initialize` runs before the first block and again when the sample rate
/// changes or the block size grows; `reset(n)` runs when processing
/// resumes after `n` samples went unrendered; demand questions from
/// downstream are routed through the op's
/// [`is_input_required`](AudioOp::is_input_required).
pub struct OpPipe<T: AudioOp> {
    op: T,
    source_capacity: usize,
    sink_capacity: usize,
    sample_rate: f32,
    block_size: usize,
    skipped: i64,
    initialized: bool,
}

impl<T: AudioOp + 'static> OpPipe<T> {
    /// Wraps `op` as a pipe with `channels` inputs and `channels` outputs.
    pub fn new(op: T, channels: usize) -> Self {
        Self::with_channels(op, channels, channels)
    }

    /// Wraps `op` with distinct input and output channel counts.
    pub fn with_channels(op: T, inputs: usize, outputs: usize) -> Self {
        Self {
            op,
            source_capacity: inputs,
            sink_capacity: outputs,
            sample_rate: 0.0,
            block_size: 0,
            skipped: 0,
            initialized: false,
        }
    }

    /// Returns the wrapped op.
    pub fn op(&self) -> &T {
        &self.op
    }

    /// Returns the wrapped op mutably.
    pub fn op_mut(&mut self) -> &mut T {
        &mut self.op
    }
}

impl<T: AudioOp + 'static> Unit for OpPipe<T> {
    fn source_capacity(&self) -> usize {
        self.source_capacity
    }

    fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }

    fn process(&mut self, buffers: &mut [Buffer]) {
        let Some(first) = buffers.first() else {
            self.skipped = INACTIVE;
            return;
        };
        let frames = first.size();
        let sample_rate = first.sample_rate();

        if !self.initialized || sample_rate != self.sample_rate || frames > self.block_size {
            self.sample_rate = sample_rate;
            self.block_size = frames;
            self.op.initialize(sample_rate, frames);
            self.initialized = true;
            self.skipped = 0;
        } else if self.skipped != 0 {
            if self.skipped > 0 {
                self.op.reset(self.skipped as usize);
            }
            self.skipped = 0;
        }

        self.op.process_replace(frames, buffers);
    }

    fn skip(&mut self, samples: usize) {
        if self.skipped != INACTIVE {
            self.skipped += samples as i64;
        }
    }

    fn input_required(&mut self, output_required: bool) -> bool {
        self.op.is_input_required(output_required)
    }
}
