//! Unary function pipe.

#[cfg(not(feature = "std"))]
use alloc::boxed::Box;

use crate::buffer::Buffer;
use crate::pipe::Unit;

/// Applies a unary function to every sample of a single channel.
///
/// Without a function the pipe passes samples through unchanged.
pub struct Func {
    function: Option<Box<dyn Fn(f32) -> f32 + Send>>,
}

impl Func {
    /// Creates a pass-through function pipe.
    pub fn new() -> Self {
        Self { function: None }
    }

    /// Creates a function pipe applying `function` to every sample.
    pub fn with_function(function: impl Fn(f32) -> f32 + Send + 'static) -> Self {
        let mut unit = Self::new();
        unit.function(function);
        unit
    }

    /// Sets the per-sample function.
    pub fn function(&mut self, function: impl Fn(f32) -> f32 + Send + 'static) -> &mut Self {
        self.function = Some(Box::new(function));
        self
    }

    /// Restores pass-through behavior.
    pub fn clear_function(&mut self) -> &mut Self {
        self.function = None;
        self
    }
}

impl Default for Func {
    fn default() -> Self {
        Self::new()
    }
}

impl Unit for Func {
    fn process(&mut self, buffers: &mut [Buffer]) {
        let Some(function) = &self.function else {
            return;
        };
        if let Some(buffer) = buffers.first_mut() {
            for sample in buffer.data_mut() {
                *sample = function(*sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_function() {
        let mut func = Func::with_function(|s| s * 2.0 + 1.0);
        let mut buffers = [Buffer::new(48000.0, 3)];
        buffers[0].data_mut().copy_from_slice(&[0.0, 1.0, -1.0]);
        func.process(&mut buffers);
        assert_eq!(buffers[0].data(), &[1.0, 3.0, -1.0]);
    }

    #[test]
    fn test_default_is_pass_through() {
        let mut func = Func::new();
        let mut buffers = [Buffer::new(48000.0, 2)];
        buffers[0].data_mut().copy_from_slice(&[0.5, -0.5]);
        func.process(&mut buffers);
        assert_eq!(buffers[0].data(), &[0.5, -0.5]);
    }
}
