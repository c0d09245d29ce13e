//! Offline metronome: drives a player by hand (no audio device) and
//! prints the tempo clock's pulses.
//!
//! Run with: `cargo run --example metronome`

use conducto_core::AudioClient;
use conducto_graph::{GraphCtx, Patch, Player};

struct Metronome;

impl Patch for Metronome {
    fn init(&mut self, g: &mut GraphCtx) {
        let clock = g.clock();
        g.clock_mut(clock)
            .set_bpm(120.0)
            .set_subdivision(1)
            .set_max_index(4)
            .link(|beat| println!("beat {beat}"));
    }
}

fn main() {
    let mut player = Player::builder(Metronome)
        .sample_rate(48000.0)
        .buffer_size(512)
        .block_size(64)
        .inputs(0)
        .outputs(1)
        .build();
    player.configure(&player.preferred_config()).unwrap();

    // two seconds of audio time, rendered as fast as possible
    let mut out = [0.0f32; 512];
    let mut time = 0i64;
    for _ in 0..188 {
        let mut outputs: [&mut [f32]; 1] = [&mut out];
        player.process(time, &[], &mut outputs, 512);
        time += 10_666_667;
    }
}
