//! Fan-out splitter.

use crate::buffer::Buffer;
use crate::pipe::Unit;

/// Splits a single input to any number of sinks.
///
/// Processing is a no-op; the split happens at delivery time, where every
/// sink receives a copy of cache slot 0 regardless of which sink index
/// asked. Graph input boundaries use a `Tee` so any number of chains can
/// tap one channel.
pub struct Tee {
    sink_capacity: usize,
}

impl Tee {
    /// Creates a splitter supporting up to 64 sinks.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Creates a splitter supporting up to `max_outputs` sinks.
    pub fn with_capacity(max_outputs: usize) -> Self {
        Self {
            sink_capacity: max_outputs,
        }
    }
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit for Tee {
    fn source_capacity(&self) -> usize {
        1
    }

    fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }

    fn process(&mut self, _buffers: &mut [Buffer]) {}

    fn write_output(&mut self, cache: &[Buffer], output: &mut Buffer, _sink_index: usize) {
        match cache.first() {
            Some(buffer) => output.copy_from(buffer),
            None => output.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_sink_gets_slot_zero() {
        let mut tee = Tee::new();
        let mut cache = [Buffer::new(48000.0, 4), Buffer::new(48000.0, 4)];
        cache[0].data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = Buffer::new(48000.0, 4);
        for sink_index in 0..3 {
            out.clear();
            tee.write_output(&cache, &mut out, sink_index);
            assert_eq!(out.data(), &[1.0, 2.0, 3.0, 4.0]);
        }
    }

    #[test]
    fn test_empty_cache_yields_silence() {
        let mut tee = Tee::new();
        let mut out = Buffer::new(48000.0, 4);
        out.data_mut().fill(1.0);
        tee.write_output(&[], &mut out, 0);
        assert_eq!(out.data(), &[0.0; 4]);
    }
}
