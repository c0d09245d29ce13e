//! Graph container and the per-block dependent mechanism.
//!
//! A [`Graph`] owns the boundary pipes of a patch (one [`Tee`] per input
//! channel, one [`Add`] per output channel, so any number of chains can
//! tap an input or mix into an output), the ordered dependent list, and
//! the sample-position clock every dependent is driven by. User code
//! implements [`Patch`] and builds onto the graph through a [`GraphCtx`],
//! which couples the graph state with the rack the pipes live in.
//!
//! Per block, the runner advances the sample position by exactly one
//! block, updates every dependent in insertion order, and then calls the
//! patch's own update hook - in that order, before any output is pulled.

use core::any::Any;

use conducto_core::{Add, AudioOp, Func, Mod, OpPipe, PatchError, PipeId, Rack, Tee, Unit};

use crate::clock::Clock;
use crate::property::Property;
use crate::scheduler::{BlockScheduler, SchedulerHandle};

/// The graph's sample clock: integer sample position plus the format it
/// advances in.
#[derive(Debug, Clone, Copy)]
pub struct Timebase {
    sample_rate: f64,
    block_size: usize,
    position: i64,
}

impl Timebase {
    fn new() -> Self {
        Self {
            sample_rate: 0.0,
            block_size: 0,
            position: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(sample_rate: f64, block_size: usize, position: i64) -> Self {
        Self {
            sample_rate,
            block_size,
            position,
        }
    }

    /// Position in samples since the stream started.
    #[inline]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Samples advanced per block.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Position in milliseconds.
    pub fn millis(&self) -> i64 {
        (self.position as f64 / self.sample_rate * 1_000.0) as i64
    }

    /// Position in nanoseconds.
    pub fn nanos(&self) -> i64 {
        (self.position as f64 / self.sample_rate * 1_000_000_000.0) as i64
    }
}

/// An object notified at the start of every block, before the patch's
/// update hook runs. The scheduler, properties and clocks are dependents.
pub trait Dependent: Any + Send {
    /// Called when the dependent joins a graph.
    fn attach(&mut self, timebase: &Timebase) {
        let _ = timebase;
    }

    /// Called when the dependent leaves a graph.
    fn detach(&mut self, timebase: &Timebase) {
        let _ = timebase;
    }

    /// Called once per block with the advanced clock.
    fn update(&mut self, timebase: &Timebase);
}

/// Handle for a registered [`Dependent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentId(u32);

/// Handle for a [`Property`] dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyId(DependentId);

/// Handle for a [`Clock`] dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockId(DependentId);

/// User-defined graph logic.
///
/// `init` runs once when the audio device is configured, with the clock
/// parked one block before zero; `update` runs every block after the
/// dependents.
pub trait Patch: Send {
    /// Build the patch: create pipes, connect them to the graph
    /// boundaries, register properties and clocks.
    fn init(&mut self, g: &mut GraphCtx);

    /// Per-block hook, after dependents have updated.
    fn update(&mut self, g: &mut GraphCtx) {
        let _ = g;
    }
}

/// Boundary pipes, dependents and clock of one patch.
pub struct Graph {
    inputs: Vec<PipeId>,
    outputs: Vec<PipeId>,
    dependents: Vec<Option<Box<dyn Dependent>>>,
    timebase: Timebase,
    scheduler: SchedulerHandle,
}

impl Graph {
    /// Creates a graph with `inputs` Tee boundary pipes and `outputs` Add
    /// boundary pipes in `rack`, and registers the sample-locked
    /// scheduler as the first dependent.
    pub fn new(rack: &mut Rack, inputs: usize, outputs: usize) -> Self {
        let inputs = (0..inputs).map(|_| rack.add(Box::new(Tee::new()))).collect();
        let outputs = (0..outputs).map(|_| rack.add(Box::new(Add::new()))).collect();
        let (scheduler_core, scheduler) = BlockScheduler::new();
        let mut graph = Self {
            inputs,
            outputs,
            dependents: Vec::new(),
            timebase: Timebase::new(),
            scheduler,
        };
        graph.add_dependent(Box::new(scheduler_core));
        graph
    }

    /// Fixes the stream format before `handle_init`.
    pub fn set_format(&mut self, sample_rate: f64, block_size: usize) {
        self.timebase.sample_rate = sample_rate;
        self.timebase.block_size = block_size;
    }

    /// One-time initialization: parks the clock one block before zero so
    /// the first update lands exactly on position 0.
    pub fn handle_init(&mut self) {
        self.timebase.position = -(self.timebase.block_size as i64);
    }

    /// Per-block lifecycle: advance the clock, then update dependents in
    /// insertion order.
    pub fn handle_update(&mut self) {
        self.timebase.position += self.timebase.block_size as i64;
        if self.timebase.position < 0 {
            self.timebase.position = 0;
        }
        let Self {
            dependents,
            timebase,
            ..
        } = self;
        for dependent in dependents.iter_mut().flatten() {
            dependent.update(timebase);
        }
    }

    /// The graph clock.
    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    /// Tee boundary pipe for input channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn input(&self, index: usize) -> PipeId {
        self.inputs[index]
    }

    /// Add boundary pipe for output channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn output(&self, index: usize) -> PipeId {
        self.outputs[index]
    }

    /// Number of input boundary pipes.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output boundary pipes.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The cross-thread scheduler handle.
    pub fn scheduler(&self) -> SchedulerHandle {
        self.scheduler.clone()
    }

    /// Registers a dependent and attaches it. Dependents update in
    /// registration order.
    pub fn add_dependent(&mut self, mut dependent: Box<dyn Dependent>) -> DependentId {
        let id = DependentId(self.dependents.len() as u32);
        dependent.attach(&self.timebase);
        self.dependents.push(Some(dependent));
        id
    }

    /// Unregisters and detaches a dependent. Unknown ids are a no-op.
    pub fn remove_dependent(&mut self, id: DependentId) {
        if let Some(slot) = self.dependents.get_mut(id.0 as usize) {
            if let Some(mut dependent) = slot.take() {
                dependent.detach(&self.timebase);
            }
        }
    }

    /// Typed access to a registered dependent.
    pub fn dependent_mut<D: Dependent>(&mut self, id: DependentId) -> Option<&mut D> {
        let dependent = self.dependents.get_mut(id.0 as usize)?.as_mut()?;
        let dependent: &mut dyn Any = dependent.as_mut();
        dependent.downcast_mut::<D>()
    }
}

/// Patch-building view coupling a [`Graph`] with its [`Rack`].
pub struct GraphCtx<'a> {
    rack: &'a mut Rack,
    graph: &'a mut Graph,
}

impl<'a> GraphCtx<'a> {
    /// Creates a context over a graph and the rack its pipes live in.
    pub fn new(rack: &'a mut Rack, graph: &'a mut Graph) -> Self {
        Self { rack, graph }
    }

    /// The rack, for direct patching.
    pub fn rack_mut(&mut self) -> &mut Rack {
        self.rack
    }

    /// Input boundary pipe `index`.
    pub fn input(&self, index: usize) -> PipeId {
        self.graph.input(index)
    }

    /// Output boundary pipe `index`.
    pub fn output(&self, index: usize) -> PipeId {
        self.graph.output(index)
    }

    /// Position in samples.
    pub fn position(&self) -> i64 {
        self.graph.timebase.position()
    }

    /// Position in milliseconds.
    pub fn millis(&self) -> i64 {
        self.graph.timebase.millis()
    }

    /// Position in nanoseconds.
    pub fn nanos(&self) -> i64 {
        self.graph.timebase.nanos()
    }

    /// Samples per block.
    pub fn block_size(&self) -> usize {
        self.graph.timebase.block_size()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.graph.timebase.sample_rate()
    }

    /// The cross-thread scheduler handle.
    pub fn scheduler(&self) -> SchedulerHandle {
        self.graph.scheduler()
    }

    /// Runs `task` on the audio thread at the start of the next block.
    pub fn invoke_later(&self, task: impl FnOnce() + Send + 'static) {
        self.graph.scheduler.execute(task);
    }

    // --- Unit constructors ---

    /// Adds a fan-in summer.
    pub fn add(&mut self) -> PipeId {
        self.rack.add(Box::new(Add::new()))
    }

    /// Adds a fan-out splitter.
    pub fn tee(&mut self) -> PipeId {
        self.rack.add(Box::new(Tee::new()))
    }

    /// Adds a multiplicative accumulator.
    pub fn modulate(&mut self) -> PipeId {
        self.rack.add(Box::new(Mod::new()))
    }

    /// Adds an accumulator combining with `function(input, accumulated)`.
    pub fn modulate_fn(&mut self, function: impl Fn(f32, f32) -> f32 + Send + 'static) -> PipeId {
        self.rack.add(Box::new(Mod::with_function(function)))
    }

    /// Adds a per-sample function pipe.
    pub fn func(&mut self, function: impl Fn(f32) -> f32 + Send + 'static) -> PipeId {
        self.rack.add(Box::new(Func::with_function(function)))
    }

    /// Adds an op-holding pipe with `channels` inputs and outputs.
    pub fn op<T: AudioOp + 'static>(&mut self, op: T, channels: usize) -> PipeId {
        self.rack.add(Box::new(OpPipe::new(op, channels)))
    }

    /// Adds any unit.
    pub fn unit(&mut self, unit: Box<dyn Unit>) -> PipeId {
        self.rack.add(unit)
    }

    /// Connects `from` to `to`.
    pub fn connect(&mut self, from: PipeId, to: PipeId) -> Result<(), PatchError> {
        self.rack.connect(from, to)
    }

    /// Connects `pipes` into a chain and returns the last one.
    pub fn link(&mut self, pipes: &[PipeId]) -> Result<Option<PipeId>, PatchError> {
        for pair in pipes.windows(2) {
            self.rack.connect(pair[0], pair[1])?;
        }
        Ok(pipes.last().copied())
    }

    // --- Dependents ---

    /// Registers a new [`Property`] with the given initial value.
    pub fn property(&mut self, initial: f64) -> PropertyId {
        let mut property = Property::new();
        property.set(initial);
        PropertyId(self.graph.add_dependent(Box::new(property)))
    }

    /// The property behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a live property of this graph.
    pub fn prop(&mut self, id: PropertyId) -> &mut Property {
        self.graph
            .dependent_mut::<Property>(id.0)
            .expect("stale property id")
    }

    /// Registers a new tempo [`Clock`].
    pub fn clock(&mut self) -> ClockId {
        ClockId(self.graph.add_dependent(Box::new(Clock::new())))
    }

    /// The clock behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a live clock of this graph.
    pub fn clock_mut(&mut self, id: ClockId) -> &mut Clock {
        self.graph
            .dependent_mut::<Clock>(id.0)
            .expect("stale clock id")
    }

    /// Registers any dependent.
    pub fn add_dependent(&mut self, dependent: Box<dyn Dependent>) -> DependentId {
        self.graph.add_dependent(dependent)
    }

    /// Unregisters a dependent.
    pub fn remove_dependent(&mut self, id: DependentId) {
        self.graph.remove_dependent(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Tracker {
        log: Arc<Mutex<Vec<(usize, i64)>>>,
        tag: usize,
        attached: Arc<Mutex<bool>>,
    }

    impl Dependent for Tracker {
        fn attach(&mut self, _: &Timebase) {
            *self.attached.lock().unwrap() = true;
        }
        fn detach(&mut self, _: &Timebase) {
            *self.attached.lock().unwrap() = false;
        }
        fn update(&mut self, timebase: &Timebase) {
            self.log.lock().unwrap().push((self.tag, timebase.position()));
        }
    }

    #[test]
    fn test_position_advances_one_block_per_update() {
        let mut rack = Rack::new();
        let mut graph = Graph::new(&mut rack, 0, 1);
        graph.set_format(48000.0, 64);
        graph.handle_init();
        assert_eq!(graph.timebase().position(), -64);
        graph.handle_update();
        assert_eq!(graph.timebase().position(), 0);
        graph.handle_update();
        assert_eq!(graph.timebase().position(), 64);
    }

    #[test]
    fn test_dependents_update_in_insertion_order() {
        let mut rack = Rack::new();
        let mut graph = Graph::new(&mut rack, 0, 1);
        graph.set_format(48000.0, 64);
        let log = Arc::new(Mutex::new(Vec::new()));
        let attached = Arc::new(Mutex::new(false));
        for tag in 0..3 {
            graph.add_dependent(Box::new(Tracker {
                log: Arc::clone(&log),
                tag,
                attached: Arc::clone(&attached),
            }));
        }
        graph.handle_init();
        graph.handle_update();
        assert_eq!(*log.lock().unwrap(), [(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_remove_dependent_detaches() {
        let mut rack = Rack::new();
        let mut graph = Graph::new(&mut rack, 0, 1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let attached = Arc::new(Mutex::new(false));
        let id = graph.add_dependent(Box::new(Tracker {
            log,
            tag: 0,
            attached: Arc::clone(&attached),
        }));
        assert!(*attached.lock().unwrap());
        graph.remove_dependent(id);
        assert!(!*attached.lock().unwrap());
    }

    #[test]
    fn test_time_views_derive_from_position() {
        let mut rack = Rack::new();
        let mut graph = Graph::new(&mut rack, 0, 1);
        graph.set_format(48000.0, 48);
        graph.handle_init();
        // 1000 updates of 48 samples = 48000 samples = exactly one second
        for _ in 0..1001 {
            graph.handle_update();
        }
        assert_eq!(graph.timebase().position(), 48000);
        assert_eq!(graph.timebase().millis(), 1000);
        assert_eq!(graph.timebase().nanos(), 1_000_000_000);
    }
}
