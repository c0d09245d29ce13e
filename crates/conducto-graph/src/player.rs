//! Wires a [`Patch`] to an audio client.
//!
//! [`Player`] owns a [`PipesClient`] with a graph runner installed as its
//! listener. At configure time the runner fixes the graph's format,
//! connects the client's boundary pipes to the graph's Tees and Adds, and
//! runs the patch's `init`; every block it advances the graph and runs
//! the patch's `update`. The player itself implements [`AudioClient`] by
//! delegation, so an audio server drives it directly.

use conducto_core::{
    AudioClient, AudioConfig, ClientError, Listener, PatchError, PipeId, PipesClient, Rack,
};

use crate::graph::{Graph, GraphCtx, Patch};

/// Client listener that owns the graph and the user patch.
struct GraphRunner<P: Patch> {
    graph: Graph,
    patch: P,
    client_sources: Vec<PipeId>,
    client_sinks: Vec<PipeId>,
    block_size: usize,
    initialized: bool,
}

impl<P: Patch> GraphRunner<P> {
    fn connect_io(&self, rack: &mut Rack) -> Result<(), ClientError> {
        for (index, &source) in self.client_sources.iter().enumerate() {
            if index >= self.graph.input_count() {
                break;
            }
            wire(rack, source, self.graph.input(index))?;
        }
        for (index, &sink) in self.client_sinks.iter().enumerate() {
            if index >= self.graph.output_count() {
                break;
            }
            wire(rack, self.graph.output(index), sink)?;
        }
        Ok(())
    }
}

/// Connects two pipes, tolerating an already-present link (reconfigure).
fn wire(rack: &mut Rack, from: PipeId, to: PipeId) -> Result<(), ClientError> {
    match rack.connect(from, to) {
        Ok(()) | Err(PatchError::Duplicate(..)) => Ok(()),
        Err(err) => Err(ClientError::Listener(err.to_string())),
    }
}

impl<P: Patch> Listener for GraphRunner<P> {
    fn configure(&mut self, rack: &mut Rack, config: &AudioConfig) -> Result<(), ClientError> {
        self.graph
            .set_format(config.sample_rate as f64, self.block_size);
        self.connect_io(rack)?;
        self.graph.handle_init();
        if !self.initialized {
            self.initialized = true;
            let mut ctx = GraphCtx::new(rack, &mut self.graph);
            self.patch.init(&mut ctx);
        }
        Ok(())
    }

    fn process(&mut self, rack: &mut Rack, _time: i64) {
        self.graph.handle_update();
        let mut ctx = GraphCtx::new(rack, &mut self.graph);
        self.patch.update(&mut ctx);
    }

    fn shutdown(&mut self) {
        tracing::debug!("graph player shut down");
    }
}

/// A patch bound to a client, ready to hand to an audio server.
pub struct Player {
    client: PipesClient,
    config: AudioConfig,
}

impl Player {
    /// Starts building a player around `patch`.
    pub fn builder(patch: impl Patch + 'static) -> PlayerBuilder {
        PlayerBuilder {
            patch: Box::new(patch),
            sample_rate: 48000.0,
            buffer_size: 1024,
            block_size: 64,
            inputs: 2,
            outputs: 2,
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &PipesClient {
        &self.client
    }

    /// Mutable access to the underlying client.
    pub fn client_mut(&mut self) -> &mut PipesClient {
        &mut self.client
    }

    /// The device configuration this player was built for.
    pub fn preferred_config(&self) -> AudioConfig {
        self.config.clone()
    }
}

impl AudioClient for Player {
    fn configure(&mut self, config: &AudioConfig) -> Result<(), ClientError> {
        self.client.configure(config)
    }

    fn process(
        &mut self,
        time: i64,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: usize,
    ) -> bool {
        self.client.process(time, inputs, outputs, nframes)
    }

    fn shutdown(&mut self) {
        self.client.shutdown()
    }
}

/// Builder for [`Player`]. Defaults: 48 kHz, 1024-sample device buffer,
/// 64-sample internal blocks, two inputs, two outputs.
pub struct PlayerBuilder {
    patch: Box<dyn Patch>,
    sample_rate: f32,
    buffer_size: usize,
    block_size: usize,
    inputs: usize,
    outputs: usize,
}

impl PlayerBuilder {
    /// Sets the sample rate in Hz.
    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sets the device buffer size in samples.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the internal block size in samples.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the input channel count.
    pub fn inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the output channel count.
    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    /// Builds the player: client, graph, runner listener, boundary ids.
    pub fn build(self) -> Player {
        let mut client = PipesClient::new(self.block_size, self.inputs, self.outputs);
        let graph = Graph::new(client.rack_mut(), self.inputs, self.outputs);
        let client_sources = (0..client.source_count())
            .map(|i| client.source_id(i))
            .collect();
        let client_sinks = (0..client.sink_count()).map(|i| client.sink_id(i)).collect();
        let runner = GraphRunner {
            graph,
            patch: self.patch,
            client_sources,
            client_sinks,
            block_size: self.block_size,
            initialized: false,
        };
        client.add_listener(Box::new(runner));
        Player {
            client,
            config: AudioConfig {
                sample_rate: self.sample_rate,
                buffer_size: self.buffer_size,
                inputs: self.inputs,
                outputs: self.outputs,
                fixed_buffer_size: true,
            },
        }
    }
}

impl Patch for Box<dyn Patch> {
    fn init(&mut self, g: &mut GraphCtx) {
        (**self).init(g)
    }

    fn update(&mut self, g: &mut GraphCtx) {
        (**self).update(g)
    }
}
