//! Tempo-aligned trigger dependent.

use crate::graph::{Dependent, Timebase};

/// Fires linked callbacks on a musical pulse derived from the graph
/// clock.
///
/// The pulse interval is `60 / (bpm * subdivision)` seconds, quantized to
/// the nearest whole number of blocks. Each pulse passes a monotonically
/// increasing index to every link, wrapping at
/// [`max_index`](Clock::set_max_index).
pub struct Clock {
    links: Vec<Box<dyn FnMut(u32) + Send>>,
    bpm: f64,
    subdivision: u32,
    index: u32,
    max_index: u32,
    buffer_count: u32,
    position: u32,
    sample_rate: f64,
    block_size: usize,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Creates a clock at 120 bpm with subdivision 4.
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            bpm: 120.0,
            subdivision: 4,
            index: 0,
            max_index: u32::MAX,
            buffer_count: 1,
            position: 0,
            sample_rate: 0.0,
            block_size: 0,
        }
    }

    /// Sets the tempo in beats per minute.
    pub fn set_bpm(&mut self, bpm: f64) -> &mut Self {
        self.bpm = bpm.max(1.0);
        self.update_pulse();
        self
    }

    /// The tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Sets the number of pulses per beat.
    pub fn set_subdivision(&mut self, subdivision: u32) -> &mut Self {
        self.subdivision = subdivision.max(1);
        self.update_pulse();
        self
    }

    /// The number of pulses per beat.
    pub fn subdivision(&self) -> u32 {
        self.subdivision
    }

    /// Runs `runnable` on every pulse.
    pub fn link(&mut self, mut runnable: impl FnMut(u32) + Send + 'static) -> &mut Self {
        self.links.push(Box::new(move |index| runnable(index)));
        self
    }

    /// Removes every link.
    pub fn clear_links(&mut self) -> &mut Self {
        self.links.clear();
        self
    }

    /// Sets the current index, wrapped into range.
    pub fn set_index(&mut self, index: u32) -> &mut Self {
        self.index = index % self.max_index;
        self
    }

    /// The index the next pulse will fire with.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Sets the index at which the pulse index wraps to zero. Clamped to
    /// at least 1.
    pub fn set_max_index(&mut self, max_index: u32) -> &mut Self {
        self.max_index = max_index.max(1);
        self.index %= self.max_index;
        self
    }

    /// The wrap point of the pulse index.
    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    /// The number of blocks between pulses at the current tempo and
    /// stream format.
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn fire(&mut self) {
        for link in &mut self.links {
            link(self.index);
        }
        self.index = (self.index + 1) % self.max_index;
    }

    fn update_pulse(&mut self) {
        if self.sample_rate <= 0.0 || self.block_size == 0 {
            return;
        }
        let secs_per_pulse = 60.0 / (self.bpm * self.subdivision as f64);
        let blocks_per_pulse = secs_per_pulse / (self.block_size as f64 / self.sample_rate);
        self.buffer_count = (blocks_per_pulse + 0.5) as u32;
        if self.buffer_count == 0 {
            self.buffer_count = 1;
        }
    }
}

impl Dependent for Clock {
    fn attach(&mut self, timebase: &Timebase) {
        self.sample_rate = timebase.sample_rate();
        self.block_size = timebase.block_size();
        self.update_pulse();
    }

    fn update(&mut self, _timebase: &Timebase) {
        if self.position == 0 {
            self.fire();
        }
        self.position = (self.position + 1) % self.buffer_count;
    }
}
