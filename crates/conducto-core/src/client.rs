//! Audio-callback client adapter.
//!
//! [`PipesClient`] implements the [`AudioClient`] contract an external
//! audio server drives: it owns the [`Rack`], one boundary source pipe per
//! device input channel and one boundary sink pipe per output channel, and
//! converts each fixed-size device callback into one or more internal
//! sub-blocks. Per sub-block it advances the clock, copies device input
//! into the boundary sources, fires the registered listeners, pulls every
//! output sink through the graph, and copies the sink buffers back out to
//! the device.

use crate::buffer::Buffer;
use crate::pipe::{PipeId, Unit};
use crate::rack::Rack;

/// Audio device configuration handed to [`AudioClient::configure`].
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// External buffer size in samples per channel.
    pub buffer_size: usize,
    /// Device input channel count.
    pub inputs: usize,
    /// Device output channel count.
    pub outputs: usize,
    /// Whether the device guarantees `buffer_size` frames per callback.
    pub fixed_buffer_size: bool,
}

/// Errors raised while configuring a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The device cannot guarantee a fixed callback size.
    NotFixedBufferSize,
    /// The external buffer size is not a multiple of the internal block
    /// size.
    BufferSizeMismatch { external: usize, internal: usize },
    /// A listener rejected the configuration.
    Listener(String),
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFixedBufferSize => {
                write!(f, "client requires a fixed device buffer size")
            }
            Self::BufferSizeMismatch { external, internal } => write!(
                f,
                "external buffer size {external} is not a multiple of internal block size {internal}"
            ),
            Self::Listener(msg) => write!(f, "listener rejected configuration: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// The contract between an audio server and a block processor.
pub trait AudioClient: Send {
    /// Accept or refuse a device configuration.
    fn configure(&mut self, config: &AudioConfig) -> Result<(), ClientError>;

    /// Process one device callback of exactly `nframes` samples per
    /// channel. Returns `false` when the callback cannot be honored (the
    /// block is dropped).
    fn process(
        &mut self,
        time: i64,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: usize,
    ) -> bool;

    /// The device is going away.
    fn shutdown(&mut self);
}

/// Handle for removing a registered [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u32);

/// Per-sub-block hooks fired by the client.
///
/// `process` runs once per internal block, after device input has been
/// copied into the boundary sources and before the output sinks are
/// pulled; this is where graph drivers advance their own clock and update
/// dependents.
pub trait Listener: Send {
    /// Called during client configuration, in listener insertion order.
    /// An error here aborts device initialization.
    fn configure(&mut self, rack: &mut Rack, config: &AudioConfig) -> Result<(), ClientError> {
        let _ = (rack, config);
        Ok(())
    }

    /// Called once per internal block with the block's nanosecond time.
    fn process(&mut self, rack: &mut Rack, time: i64);

    /// Called when the client shuts down.
    fn shutdown(&mut self) {}
}

/// Boundary pipe feeding one device input channel into the graph. Emits
/// the block most recently copied in by the client.
struct InputSource {
    data: Vec<f32>,
}

impl InputSource {
    fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl Unit for InputSource {
    fn source_capacity(&self) -> usize {
        0
    }

    fn process(&mut self, buffers: &mut [Buffer]) {
        if let Some(output) = buffers.first_mut() {
            let frames = output.size().min(self.data.len());
            output.data_mut()[..frames].copy_from_slice(&self.data[..frames]);
        }
    }
}

/// Boundary pipe swallowing one output channel. Registered as its own
/// sink so the pull protocol runs its single source in place; demand is
/// gated on the channel's active flag.
struct OutputSink {
    active: bool,
}

impl OutputSink {
    fn new() -> Self {
        Self { active: false }
    }
}

impl Unit for OutputSink {
    fn process(&mut self, _buffers: &mut [Buffer]) {}

    fn output_gate(&self) -> Option<bool> {
        Some(self.active)
    }
}

/// Audio client that evaluates a pipe graph, sub-blocking the device
/// buffer into a smaller internal block size.
pub struct PipesClient {
    rack: Rack,
    sources: Vec<PipeId>,
    sinks: Vec<PipeId>,
    sink_buffers: Vec<Buffer>,
    listeners: Vec<Option<Box<dyn Listener>>>,
    sample_rate: f32,
    buffer_size: usize,
    block_size: usize,
    time: i64,
    nanos_per_block: i64,
}

impl PipesClient {
    /// Creates a client with `inputs` boundary sources and `outputs`
    /// boundary sinks, processing internally in `block_size`-sample
    /// blocks. A `block_size` of 0 adopts the device buffer size at
    /// configuration.
    ///
    /// # Panics
    ///
    /// Panics if `outputs` is zero.
    pub fn new(block_size: usize, inputs: usize, outputs: usize) -> Self {
        assert!(outputs >= 1, "client requires at least one output");
        let mut rack = Rack::new();
        let sources = (0..inputs)
            .map(|_| rack.add(Box::new(InputSource::new())))
            .collect();
        let sinks: Vec<PipeId> = (0..outputs)
            .map(|_| rack.add(Box::new(OutputSink::new())))
            .collect();
        for &sink in &sinks {
            rack.register_self_sink(sink);
        }
        Self {
            rack,
            sources,
            sinks,
            sink_buffers: Vec::new(),
            listeners: Vec::new(),
            sample_rate: 0.0,
            buffer_size: 0,
            block_size,
            time: i64::MIN,
            nanos_per_block: 0,
        }
    }

    /// Registers a listener; hooks fire in registration order.
    pub fn add_listener(&mut self, listener: Box<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.listeners.len() as u32);
        self.listeners.push(Some(listener));
        id
    }

    /// Removes a listener. Removing one that is already gone is a no-op.
    pub fn remove_listener(&mut self, id: ListenerId) {
        if let Some(slot) = self.listeners.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// The rack holding the boundary pipes and everything patched onto
    /// them.
    pub fn rack(&self) -> &Rack {
        &self.rack
    }

    /// Mutable access to the rack, for patching.
    pub fn rack_mut(&mut self) -> &mut Rack {
        &mut self.rack
    }

    /// Boundary source pipe for device input channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= source_count()`.
    pub fn source_id(&self, index: usize) -> PipeId {
        self.sources[index]
    }

    /// Number of boundary source pipes.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Boundary sink pipe for device output channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= sink_count()`.
    pub fn sink_id(&self, index: usize) -> PipeId {
        self.sinks[index]
    }

    /// Number of boundary sink pipes.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Nanosecond time of the block currently being processed.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// The internal block size (0 until configured when unset).
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Detaches every pipe patched onto the boundary pipes.
    pub fn disconnect_all(&mut self) {
        for index in 0..self.sources.len() {
            let source = self.sources[index];
            if let Ok(sink) = self.rack.sink_at(source, 0) {
                self.rack.disconnect(source, sink);
            }
        }
        for index in 0..self.sinks.len() {
            let sink = self.sinks[index];
            if let Ok(source) = self.rack.source_at(sink, 0) {
                self.rack.disconnect(source, sink);
            }
        }
    }
}

impl AudioClient for PipesClient {
    fn configure(&mut self, config: &AudioConfig) -> Result<(), ClientError> {
        if !config.fixed_buffer_size {
            return Err(ClientError::NotFixedBufferSize);
        }
        self.sample_rate = config.sample_rate;
        self.buffer_size = config.buffer_size;

        if self.block_size != 0 {
            if self.buffer_size % self.block_size != 0 {
                return Err(ClientError::BufferSizeMismatch {
                    external: self.buffer_size,
                    internal: self.block_size,
                });
            }
        } else {
            self.block_size = self.buffer_size;
        }
        self.nanos_per_block =
            ((self.block_size as f64 / config.sample_rate as f64) * 1_000_000_000.0) as i64;
        tracing::debug!(nanos_per_block = self.nanos_per_block, "client configured");

        // Listeners validate after us and before any allocation, so a
        // refused configuration leaves no half-built state.
        let Self { rack, listeners, .. } = self;
        for listener in listeners.iter_mut().flatten() {
            listener.configure(rack, config)?;
        }

        for &source in &self.sources {
            if let Some(unit) = self.rack.unit_mut::<InputSource>(source) {
                unit.data.clear();
                unit.data.resize(self.block_size, 0.0);
            }
        }
        self.sink_buffers.clear();
        for _ in &self.sinks {
            self.sink_buffers
                .push(Buffer::new(self.sample_rate, self.block_size));
        }
        let active = config.outputs.min(self.sinks.len());
        for (index, &sink) in self.sinks.iter().enumerate() {
            if let Some(unit) = self.rack.unit_mut::<OutputSink>(sink) {
                unit.active = index < active;
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        time: i64,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: usize,
    ) -> bool {
        if nframes != self.buffer_size || self.sink_buffers.is_empty() {
            return false;
        }
        if self.time != i64::MIN && time < self.time {
            tracing::warn!(
                passed = time,
                last = self.time,
                "callback time regressed; continuing"
            );
        }

        let block_size = self.block_size;
        let nanos_per_block = self.nanos_per_block;
        let sub_blocks = nframes / block_size;
        let mut time = time - (sub_blocks as i64 - 1) * nanos_per_block;

        for sub in 0..sub_blocks {
            self.time = time;
            let offset = sub * block_size;

            let input_count = inputs.len().min(self.sources.len());
            for channel in 0..input_count {
                let source = self.sources[channel];
                if let Some(unit) = self.rack.unit_mut::<InputSource>(source) {
                    unit.data
                        .copy_from_slice(&inputs[channel][offset..offset + block_size]);
                }
            }

            let Self {
                rack,
                listeners,
                sinks,
                sink_buffers,
                ..
            } = self;
            for listener in listeners.iter_mut().flatten() {
                listener.process(rack, time);
            }

            for (index, &sink) in sinks.iter().enumerate() {
                rack.pull(sink, sink, &mut sink_buffers[index], time);
            }

            let output_count = outputs.len().min(sinks.len());
            for channel in 0..output_count {
                outputs[channel][offset..offset + block_size]
                    .copy_from_slice(sink_buffers[channel].data());
            }

            time += nanos_per_block;
        }
        true
    }

    fn shutdown(&mut self) {
        for index in 0..self.sinks.len() {
            let sink = self.sinks[index];
            if let Some(unit) = self.rack.unit_mut::<OutputSink>(sink) {
                unit.active = false;
            }
        }
        for listener in self.listeners.iter_mut().flatten() {
            listener.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::AudioOp;
    use crate::units::{Add, OpPipe};

    struct Unity;

    impl AudioOp for Unity {
        fn initialize(&mut self, _: f32, _: usize) {}
        fn process_replace(&mut self, _: usize, _: &mut [Buffer]) {}
        fn process_add(&mut self, _frames: usize, outputs: &mut [Buffer], inputs: &[Buffer]) {
            for (out, input) in outputs.iter_mut().zip(inputs.iter()) {
                out.add_from(input);
            }
        }
    }

    fn config(sample_rate: f32, buffer_size: usize) -> AudioConfig {
        AudioConfig {
            sample_rate,
            buffer_size,
            inputs: 1,
            outputs: 1,
            fixed_buffer_size: true,
        }
    }

    #[test]
    fn test_rejects_variable_buffer_size() {
        let mut client = PipesClient::new(64, 1, 1);
        let mut cfg = config(48000.0, 256);
        cfg.fixed_buffer_size = false;
        assert_eq!(client.configure(&cfg), Err(ClientError::NotFixedBufferSize));
    }

    #[test]
    fn test_rejects_non_multiple_buffer_size() {
        let mut client = PipesClient::new(48, 1, 1);
        assert_eq!(
            client.configure(&config(48000.0, 256)),
            Err(ClientError::BufferSizeMismatch {
                external: 256,
                internal: 48
            })
        );
    }

    #[test]
    fn test_listener_failure_propagates() {
        struct Refuser;
        impl Listener for Refuser {
            fn configure(&mut self, _: &mut Rack, _: &AudioConfig) -> Result<(), ClientError> {
                Err(ClientError::Listener("no".into()))
            }
            fn process(&mut self, _: &mut Rack, _: i64) {}
        }
        let mut client = PipesClient::new(64, 1, 1);
        client.add_listener(Box::new(Refuser));
        assert_eq!(
            client.configure(&config(48000.0, 256)),
            Err(ClientError::Listener("no".into()))
        );
    }

    #[test]
    fn test_rejects_wrong_frame_count() {
        let mut client = PipesClient::new(4, 0, 1);
        let mut cfg = config(48000.0, 8);
        cfg.inputs = 0;
        client.configure(&cfg).unwrap();
        let mut out = [0.0f32; 16];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(!client.process(0, &[], &mut outputs, 16));
    }

    #[test]
    fn test_impulse_through_pass_through_chain() {
        // Block size 4, two unity op pipes in series between the device
        // input and the device output.
        let mut client = PipesClient::new(4, 1, 1);
        let first = client.rack_mut().add(Box::new(OpPipe::new(Unity, 1)));
        let second = client.rack_mut().add(Box::new(OpPipe::new(Unity, 1)));
        let input = client.source_id(0);
        let output = client.sink_id(0);
        client.rack_mut().connect(input, first).unwrap();
        client.rack_mut().connect(first, second).unwrap();
        client.rack_mut().connect(second, output).unwrap();
        client.configure(&config(48000.0, 4)).unwrap();

        let impulse = [1.0f32, 0.0, 0.0, 0.0];
        let mut out = [9.0f32; 4];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(client.process(1_000, &[&impulse], &mut outputs, 4));
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_summer_with_no_sources_yields_silence() {
        let mut client = PipesClient::new(8, 0, 1);
        let add = client.rack_mut().add(Box::new(Add::new()));
        let output = client.sink_id(0);
        client.rack_mut().connect(add, output).unwrap();
        let mut cfg = config(48000.0, 8);
        cfg.inputs = 0;
        client.configure(&cfg).unwrap();

        let mut out = [1.0f32; 8];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(client.process(1_000, &[], &mut outputs, 8));
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn test_sub_blocking_advances_time_per_block() {
        use std::sync::{Arc, Mutex};

        struct TimeLog(Arc<Mutex<Vec<i64>>>);
        impl Listener for TimeLog {
            fn process(&mut self, _: &mut Rack, time: i64) {
                self.0.lock().unwrap().push(time);
            }
        }
        // 64 frames internal at 64 kHz: exactly 1 ms per block.
        let times = Arc::new(Mutex::new(Vec::new()));
        let mut client = PipesClient::new(64, 0, 1);
        client.add_listener(Box::new(TimeLog(Arc::clone(&times))));
        let mut cfg = config(64000.0, 256);
        cfg.inputs = 0;
        client.configure(&cfg).unwrap();

        let mut out = [0.0f32; 256];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(client.process(4_000_000, &[], &mut outputs, 256));
        // The callback time names the last sub-block; earlier sub-blocks
        // are biased backwards by one block time each.
        assert_eq!(
            *times.lock().unwrap(),
            [1_000_000, 2_000_000, 3_000_000, 4_000_000]
        );
    }

    #[test]
    fn test_sub_blocked_ramp_preserved() {
        // External 8 frames split into two internal blocks of 4; an empty
        // patch from input to output must reproduce the ramp exactly.
        let mut client = PipesClient::new(4, 1, 1);
        let input = client.source_id(0);
        let output = client.sink_id(0);
        client.rack_mut().connect(input, output).unwrap();
        client.configure(&config(48000.0, 8)).unwrap();

        let ramp = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut out = [0.0f32; 8];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(client.process(10_000, &[&ramp], &mut outputs, 8));
        assert_eq!(out, ramp);
    }
}
