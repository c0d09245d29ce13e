//! The external audio operator contract.
//!
//! An [`AudioOp`] is a block transformer supplied by DSP code outside this
//! crate: filters, reverbs, oscillators, samplers. The graph never inspects
//! an op's internals; it drives the initialize/reset/process lifecycle and
//! asks the op whether it still needs live input (so effects with tails keep
//! pulling their sources while decaying).
//!
//! Ops are wrapped into the graph by [`OpPipe`](crate::units::OpPipe).

use crate::buffer::Buffer;

/// A sample-block transformer with an initialize/reset/process lifecycle.
///
/// All processing methods run on the audio thread and must not allocate,
/// block, or perform I/O.
pub trait AudioOp: Send {
    /// Called before the first process call and again whenever the sample
    /// rate changes or the block size grows beyond `max_block_size`.
    fn initialize(&mut self, sample_rate: f32, max_block_size: usize);

    /// Called when processing resumes after `skipped` samples were not
    /// rendered, so state that advances with time (LFO phase, delay read
    /// heads) can catch up. Default: no compensation needed.
    fn reset(&mut self, skipped: usize) {
        let _ = skipped;
    }

    /// Answers whether the op needs input samples to correctly produce
    /// output. `output_required` says whether anything downstream wants
    /// this op's output. A reverb returns true while its tail is audible
    /// even when `output_required` is false upstream of it; a pure
    /// generator may return false to spare its unused source. Default:
    /// input is needed exactly when output is.
    fn is_input_required(&self, output_required: bool) -> bool {
        output_required
    }

    /// Transforms `frames` samples in place. `channels` holds one buffer
    /// per channel; each buffer is both input and output.
    fn process_replace(&mut self, frames: usize, channels: &mut [Buffer]);

    /// Transforms `inputs` and accumulates the result into `outputs`.
    /// Used by hosts that render several ops additively into a shared bus;
    /// [`OpPipe`](crate::units::OpPipe) itself only uses
    /// [`process_replace`](AudioOp::process_replace).
    fn process_add(&mut self, frames: usize, outputs: &mut [Buffer], inputs: &[Buffer]);
}
