//! Integration tests for the pull scheduler driven through the client
//! adapter: fan-out identity, fan-in summing, demand pruning, in-place vs
//! cached equivalence, and skip/reset accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conducto_core::{
    Add, AudioClient, AudioConfig, AudioOp, Buffer, Func, OpPipe, PipesClient, Tee,
};

const SAMPLE_RATE: f32 = 48000.0;

fn config(buffer_size: usize, inputs: usize, outputs: usize) -> AudioConfig {
    AudioConfig {
        sample_rate: SAMPLE_RATE,
        buffer_size,
        inputs,
        outputs,
        fixed_buffer_size: true,
    }
}

/// One lifecycle event of a traced op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Init,
    Reset(usize),
    Block,
}

/// Unity op that records its lifecycle.
struct TraceOp {
    events: Vec<Event>,
}

impl TraceOp {
    fn new() -> Self {
        Self { events: Vec::new() }
    }
}

impl AudioOp for TraceOp {
    fn initialize(&mut self, _: f32, _: usize) {
        self.events.push(Event::Init);
    }
    fn reset(&mut self, skipped: usize) {
        self.events.push(Event::Reset(skipped));
    }
    fn process_replace(&mut self, _: usize, _: &mut [Buffer]) {
        self.events.push(Event::Block);
    }
    fn process_add(&mut self, _: usize, outputs: &mut [Buffer], inputs: &[Buffer]) {
        for (out, input) in outputs.iter_mut().zip(inputs) {
            out.add_from(input);
        }
    }
}

/// Pass-through op whose input demand is an external switch.
struct GateOp {
    open: Arc<AtomicBool>,
}

impl AudioOp for GateOp {
    fn initialize(&mut self, _: f32, _: usize) {}
    fn is_input_required(&self, output_required: bool) -> bool {
        output_required && self.open.load(Ordering::Relaxed)
    }
    fn process_replace(&mut self, _: usize, _: &mut [Buffer]) {}
    fn process_add(&mut self, _: usize, _: &mut [Buffer], _: &[Buffer]) {}
}

#[test]
fn fan_out_delivers_identical_copies() {
    // input -> tee -> two active output channels
    let mut client = PipesClient::new(4, 1, 2);
    let tee = client.rack_mut().add(Box::new(Tee::new()));
    let input = client.source_id(0);
    let (out0, out1) = (client.sink_id(0), client.sink_id(1));
    client.rack_mut().connect(input, tee).unwrap();
    client.rack_mut().connect(tee, out0).unwrap();
    client.rack_mut().connect(tee, out1).unwrap();
    client.configure(&config(4, 1, 2)).unwrap();

    let block = [0.25f32, -0.5, 0.75, -1.0];
    let mut a = [0.0f32; 4];
    let mut b = [0.0f32; 4];
    let mut outputs: [&mut [f32]; 2] = [&mut a, &mut b];
    assert!(client.process(1_000, &[&block], &mut outputs, 4));
    assert_eq!(a, block);
    assert_eq!(b, block);
}

#[test]
fn fan_in_sums_every_source() {
    // three constant generators -> add -> output
    let mut client = PipesClient::new(4, 0, 1);
    let add = client.rack_mut().add(Box::new(Add::new()));
    let sink = client.sink_id(0);
    for value in [1.0f32, 2.0, 3.0] {
        // a generator: func over the silent default input
        let gen = client
            .rack_mut()
            .add(Box::new(Func::with_function(move |_| value)));
        client.rack_mut().connect(gen, add).unwrap();
    }
    client.rack_mut().connect(add, sink).unwrap();
    client.configure(&config(4, 0, 1)).unwrap();

    let mut out = [0.0f32; 4];
    let mut outputs: [&mut [f32]; 1] = [&mut out];
    assert!(client.process(1_000, &[], &mut outputs, 4));
    assert_eq!(out, [6.0; 4]);
}

#[test]
fn silent_channel_is_pruned_without_starving_the_active_one() {
    // input -> tee -> out0 (active) and out1 (inactive: the device only
    // exposes one output channel). The tee must still pull the input for
    // out0; out1's buffer stays silent.
    let mut client = PipesClient::new(4, 1, 2);
    let tee = client.rack_mut().add(Box::new(Tee::new()));
    let input = client.source_id(0);
    let (out0, out1) = (client.sink_id(0), client.sink_id(1));
    client.rack_mut().connect(input, tee).unwrap();
    client.rack_mut().connect(tee, out0).unwrap();
    client.rack_mut().connect(tee, out1).unwrap();
    client.configure(&config(4, 1, 1)).unwrap();

    let block = [0.5f32, 0.25, -0.25, -0.5];
    let mut a = [0.0f32; 4];
    let mut b = [0.0f32; 4];
    let mut outputs: [&mut [f32]; 2] = [&mut a, &mut b];
    assert!(client.process(1_000, &[&block], &mut outputs, 4));
    assert_eq!(a, block);
    assert_eq!(b, [0.0; 4]);
}

#[test]
fn in_place_and_cached_paths_agree_bit_for_bit() {
    let shape = |s: f32| (s * 0.5 + 0.25) * s;

    let run = |force_cached: bool, block: &[f32; 8]| -> [f32; 8] {
        let outputs_needed = if force_cached { 2 } else { 1 };
        let mut client = PipesClient::new(8, 1, outputs_needed);
        let first = client.rack_mut().add(Box::new(Func::with_function(shape)));
        let second = client.rack_mut().add(Box::new(Func::with_function(shape)));
        let input = client.source_id(0);
        let sink = client.sink_id(0);
        client.rack_mut().connect(input, first).unwrap();
        client.rack_mut().connect(first, second).unwrap();
        client.rack_mut().connect(second, sink).unwrap();
        if force_cached {
            // A second (inactive) sink on the middle pipe forces the
            // cached path through the whole chain.
            let tee = client.rack_mut().add(Box::new(Tee::new()));
            let spare_sink = client.sink_id(1);
            client.rack_mut().connect(first, tee).unwrap();
            client.rack_mut().connect(tee, spare_sink).unwrap();
        }
        client.configure(&config(8, 1, 1)).unwrap();

        let mut out = [0.0f32; 8];
        let mut spare = [0.0f32; 8];
        let ok = if force_cached {
            let mut outputs: [&mut [f32]; 2] = [&mut out, &mut spare];
            client.process(1_000, &[block], &mut outputs, 8)
        } else {
            let mut outputs: [&mut [f32]; 1] = [&mut out];
            client.process(1_000, &[block], &mut outputs, 8)
        };
        assert!(ok);
        out
    };

    let block = [0.1f32, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8];
    assert_eq!(run(false, &block), run(true, &block));
}

#[test]
fn skipped_blocks_collapse_into_one_reset() {
    // trace -> gate -> output. While the gate refuses input the upstream
    // op skips; when it reopens, exactly one reset(k) arrives with k equal
    // to the skipped sample count, before the next block.
    let open = Arc::new(AtomicBool::new(true));
    let mut client = PipesClient::new(16, 0, 1);
    let traced = client.rack_mut().add(Box::new(OpPipe::new(TraceOp::new(), 1)));
    let gate = client.rack_mut().add(Box::new(OpPipe::new(
        GateOp {
            open: Arc::clone(&open),
        },
        1,
    )));
    let sink = client.sink_id(0);
    client.rack_mut().connect(traced, gate).unwrap();
    client.rack_mut().connect(gate, sink).unwrap();
    client.configure(&config(16, 0, 1)).unwrap();

    let mut run_block = |client: &mut PipesClient, time: i64| {
        let mut out = [0.0f32; 16];
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        assert!(client.process(time, &[], &mut outputs, 16));
    };

    run_block(&mut client, 1_000_000);
    open.store(false, Ordering::Relaxed);
    run_block(&mut client, 2_000_000);
    run_block(&mut client, 3_000_000);
    run_block(&mut client, 4_000_000);
    open.store(true, Ordering::Relaxed);
    run_block(&mut client, 5_000_000);

    let events = &client
        .rack()
        .unit::<OpPipe<TraceOp>>(traced)
        .unwrap()
        .op()
        .events;
    assert_eq!(
        events,
        &[
            Event::Init,
            Event::Block,
            Event::Reset(48),
            Event::Block
        ]
    );
}

#[test]
fn process_runs_once_per_block_under_fan_out() {
    // trace -> tee -> two active outputs: one process per block, not two.
    let mut client = PipesClient::new(8, 0, 2);
    let traced = client.rack_mut().add(Box::new(OpPipe::new(TraceOp::new(), 1)));
    let tee = client.rack_mut().add(Box::new(Tee::new()));
    let (out0, out1) = (client.sink_id(0), client.sink_id(1));
    client.rack_mut().connect(traced, tee).unwrap();
    client.rack_mut().connect(tee, out0).unwrap();
    client.rack_mut().connect(tee, out1).unwrap();
    client.configure(&config(8, 0, 2)).unwrap();

    for time in [1_000_000, 2_000_000, 3_000_000] {
        let mut a = [0.0f32; 8];
        let mut b = [0.0f32; 8];
        let mut outputs: [&mut [f32]; 2] = [&mut a, &mut b];
        assert!(client.process(time, &[], &mut outputs, 8));
    }

    let events = &client
        .rack()
        .unit::<OpPipe<TraceOp>>(traced)
        .unwrap()
        .op()
        .events;
    let blocks = events.iter().filter(|e| **e == Event::Block).count();
    assert_eq!(blocks, 3);
}
