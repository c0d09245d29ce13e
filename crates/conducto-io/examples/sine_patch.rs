//! Plays a 440 Hz sine through the default output device, with the level
//! animated by a graph property.
//!
//! Run with: `cargo run --example sine_patch`

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conducto_core::{AudioOp, Buffer};
use conducto_graph::{GraphCtx, Patch, Player};
use conducto_io::{AudioServer, ServerConfig};

/// Minimal oscillator op: the DSP side of the fence.
struct SineOp {
    frequency: f32,
    phase: f32,
    sample_rate: f32,
}

impl SineOp {
    fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
            sample_rate: 48000.0,
        }
    }
}

impl AudioOp for SineOp {
    fn initialize(&mut self, sample_rate: f32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.phase = 0.0;
    }

    fn reset(&mut self, skipped: usize) {
        let step = TAU * self.frequency / self.sample_rate;
        self.phase = (self.phase + step * skipped as f32) % TAU;
    }

    fn is_input_required(&self, _output_required: bool) -> bool {
        false
    }

    fn process_replace(&mut self, frames: usize, channels: &mut [Buffer]) {
        let step = TAU * self.frequency / self.sample_rate;
        for channel in channels.iter_mut() {
            let mut phase = self.phase;
            for sample in channel.data_mut()[..frames].iter_mut() {
                *sample = phase.sin();
                phase = (phase + step) % TAU;
            }
        }
        self.phase = (self.phase + step * frames as f32) % TAU;
    }

    fn process_add(&mut self, frames: usize, outputs: &mut [Buffer], _inputs: &[Buffer]) {
        for channel in outputs.iter_mut() {
            let mut phase = self.phase;
            for sample in channel.data_mut()[..frames].iter_mut() {
                *sample += phase.sin();
                phase = (phase + TAU * self.frequency / self.sample_rate) % TAU;
            }
        }
        self.phase =
            (self.phase + TAU * self.frequency / self.sample_rate * frames as f32) % TAU;
    }
}

struct SinePatch {
    level_bits: Arc<AtomicU64>,
}

impl Patch for SinePatch {
    fn init(&mut self, g: &mut GraphCtx) {
        let osc = g.op(SineOp::new(440.0), 1);

        let level_bits = Arc::clone(&self.level_bits);
        let gain =
            g.func(move |s| s * f64::from_bits(level_bits.load(Ordering::Relaxed)) as f32);

        let out_left = g.output(0);
        let out_right = g.output(1);
        let split = g.tee();
        g.connect(osc, gain).unwrap();
        g.connect(gain, split).unwrap();
        g.connect(split, out_left).unwrap();
        g.connect(split, out_right).unwrap();

        // fade in over two seconds
        let level_bits = Arc::clone(&self.level_bits);
        let level = g.property(0.0);
        g.prop(level)
            .link(move |value| level_bits.store(value.to_bits(), Ordering::Relaxed));
        g.prop(level).to(&[0.3]).in_secs(&[2.0]).ease_out();
    }
}

fn main() -> conducto_io::Result<()> {
    let player = Player::builder(SinePatch {
        level_bits: Arc::new(AtomicU64::new(0)),
    })
    .sample_rate(48000.0)
    .buffer_size(1024)
    .block_size(64)
    .inputs(0)
    .outputs(2)
    .build();

    let mut server = AudioServer::new(ServerConfig {
        sample_rate: 48000,
        buffer_size: 1024,
        inputs: 0,
        outputs: 2,
        ..ServerConfig::default()
    })?;

    println!("playing; ctrl-c to quit");
    server.run(player)
}
