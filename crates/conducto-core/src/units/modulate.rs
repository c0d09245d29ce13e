//! Multi-input accumulator with a user-supplied combine function.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use crate::buffer::Buffer;
use crate::pipe::Unit;

/// Combines every additional source into the first, sample by sample.
///
/// The default combine is multiplication (ring modulation); a custom
/// binary function can be supplied with [`function`](Mod::function). The
/// function receives `(input, accumulated)` and returns the new
/// accumulated sample. With fewer than two sources the first source
/// passes through unchanged.
pub struct Mod {
    function: Option<Box<dyn Fn(f32, f32) -> f32 + Send>>,
}

impl Mod {
    /// Creates an accumulator accepting up to 32 sources.
    pub fn new() -> Self {
        Self { function: None }
    }

    /// Creates an accumulator with a custom combine function.
    pub fn with_function(function: impl Fn(f32, f32) -> f32 + Send + 'static) -> Self {
        let mut unit = Self::new();
        unit.function(function);
        unit
    }

    /// Sets the combine function applied as `f(input, accumulated)`.
    pub fn function(&mut self, function: impl Fn(f32, f32) -> f32 + Send + 'static) -> &mut Self {
        self.function = Some(Box::new(function));
        self
    }

    /// Restores the default multiplicative combine.
    pub fn clear_function(&mut self) -> &mut Self {
        self.function = None;
        self
    }
}

impl Default for Mod {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit for Mod {
    fn source_capacity(&self) -> usize {
        32
    }

    fn sink_capacity(&self) -> usize {
        1
    }

    fn process(&mut self, buffers: &mut [Buffer]) {
        let Some((out, rest)) = buffers.split_first_mut() else {
            return;
        };
        for input in rest.iter() {
            match &self.function {
                None => {
                    for (acc, sample) in out.data_mut().iter_mut().zip(input.data().iter()) {
                        *acc *= *sample;
                    }
                }
                Some(function) => {
                    for (acc, sample) in out.data_mut().iter_mut().zip(input.data().iter()) {
                        *acc = function(*sample, *acc);
                    }
                }
            }
        }
    }

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

    fn buffer(values: &[f32]) -> Buffer {
        let mut buf = Buffer::new(48000.0, values.len());
        buf.data_mut().copy_from_slice(values);
        buf
    }

    #[test]
    fn test_default_combine_multiplies() {
        let mut unit = Mod::new();
        let mut buffers = [buffer(&[2.0, 3.0]), buffer(&[4.0, 5.0]), buffer(&[0.5, 2.0])];
        unit.process(&mut buffers);
        assert_eq!(buffers[0].data(), &[4.0, 30.0]);
    }

    #[test]
    fn test_custom_combine() {
        let mut unit = Mod::with_function(|input, acc| acc - input);
        let mut buffers = [buffer(&[10.0]), buffer(&[3.0])];
        unit.process(&mut buffers);
        assert_eq!(buffers[0].data(), &[7.0]);
    }

    #[test]
    fn test_single_source_passes_through() {
        let mut unit = Mod::new();
        let mut buffers = [buffer(&[0.25, 0.75])];
        unit.process(&mut buffers);
        assert_eq!(buffers[0].data(), &[0.25, 0.75]);
    }
}
