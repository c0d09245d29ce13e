//! cpal-backed audio server.
//!
//! [`AudioServer`] opens an output stream (and an input stream when the
//! client wants input channels), requests a fixed buffer size, and calls
//! the client once per device callback. The device's interleaved frames
//! are converted to the per-channel layout the client contract uses, and
//! the block timestamp is synthesized from the running sample count so it
//! advances monotonically even when the device clock is noisy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, Stream, StreamConfig};

use conducto_core::{AudioClient, AudioConfig};

use crate::{Error, Result};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Device buffer size in frames.
    pub buffer_size: u32,
    /// Input channels to capture (0 disables the input stream).
    pub inputs: u16,
    /// Output channels to render.
    pub outputs: u16,
    /// Output device name, or `None` for the default device.
    pub output_device: Option<String>,
    /// Input device name, or `None` for the default device.
    pub input_device: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 1024,
            inputs: 0,
            outputs: 2,
            output_device: None,
            input_device: None,
        }
    }
}

/// Lists the names of the available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Stream(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Returns the default output device name, if any.
pub fn default_output_device() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// Owns the device streams and drives one [`AudioClient`].
pub struct AudioServer {
    #[allow(dead_code)]
    host: Host,
    output_device: Device,
    input_device: Option<Device>,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    _output_stream: Option<Stream>,
    _input_stream: Option<Stream>,
}

impl AudioServer {
    /// Resolves the configured devices.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let host = cpal::default_host();
        let output_device = match &config.output_device {
            Some(name) => find_output_device(&host, name)?,
            None => host.default_output_device().ok_or(Error::NoDevice)?,
        };
        let input_device = if config.inputs > 0 {
            Some(match &config.input_device {
                Some(name) => find_input_device(&host, name)?,
                None => host.default_input_device().ok_or(Error::NoDevice)?,
            })
        } else {
            None
        };
        Ok(Self {
            host,
            output_device,
            input_device,
            config,
            running: Arc::new(AtomicBool::new(false)),
            _output_stream: None,
            _input_stream: None,
        })
    }

    /// Configures `client` and runs the streams until [`stop`](Self::stop)
    /// is called. Blocks the calling thread.
    pub fn run(&mut self, mut client: impl AudioClient + 'static) -> Result<()> {
        let sample_rate = self.config.sample_rate;
        let frames = self.config.buffer_size as usize;
        let inputs = self.config.inputs as usize;
        let outputs = self.config.outputs as usize;

        client.configure(&AudioConfig {
            sample_rate: sample_rate as f32,
            buffer_size: frames,
            inputs,
            outputs,
            fixed_buffer_size: true,
        })?;

        let stream_config = StreamConfig {
            channels: self.config.outputs,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Fixed(self.config.buffer_size),
        };

        self.running.store(true, Ordering::SeqCst);

        // Input samples cross from the capture callback to the render
        // callback through a channel; the render side buffers until it
        // has one full device block.
        let (tx, rx) = mpsc::sync_channel::<Vec<f32>>(4);
        if let Some(device) = &self.input_device {
            let input_config = StreamConfig {
                channels: self.config.inputs,
                sample_rate: SampleRate(sample_rate),
                buffer_size: BufferSize::Fixed(self.config.buffer_size),
            };
            let running = Arc::clone(&self.running);
            let stream = device
                .build_input_stream(
                    &input_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if running.load(Ordering::SeqCst) && tx.try_send(data.to_vec()).is_err() {
                            tracing::warn!("input overrun, dropping a capture block");
                        }
                    },
                    |err| tracing::warn!(%err, "input stream error"),
                    None,
                )
                .map_err(|e| Error::Stream(e.to_string()))?;
            stream.play().map_err(|e| Error::Stream(e.to_string()))?;
            self._input_stream = Some(stream);
        }

        // Per-channel staging reused every callback.
        let mut in_channels: Vec<Vec<f32>> = vec![vec![0.0; frames]; inputs];
        let mut out_channels: Vec<Vec<f32>> = vec![vec![0.0; frames]; outputs];
        let mut pending_input: Vec<f32> = Vec::new();
        let nanos_per_frame = 1_000_000_000.0 / sample_rate as f64;
        let mut clock_frames: u64 = 0;

        let running = Arc::clone(&self.running);
        let stream = self
            .output_device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        return;
                    }
                    let nframes = data.len() / outputs.max(1);
                    if nframes != frames {
                        // the fixed-size request was not honored this round
                        data.fill(0.0);
                        return;
                    }

                    if inputs > 0 {
                        while let Ok(samples) = rx.try_recv() {
                            pending_input.extend(samples);
                        }
                        let needed = frames * inputs;
                        if pending_input.len() >= needed {
                            let block: Vec<f32> = pending_input.drain(..needed).collect();
                            deinterleave(&block, inputs, &mut in_channels);
                        } else {
                            for channel in &mut in_channels {
                                channel.fill(0.0);
                            }
                        }
                    }

                    let time = (clock_frames as f64 * nanos_per_frame) as i64;
                    clock_frames += nframes as u64;

                    let input_refs: Vec<&[f32]> =
                        in_channels.iter().map(|c| c.as_slice()).collect();
                    let mut output_refs: Vec<&mut [f32]> =
                        out_channels.iter_mut().map(|c| c.as_mut_slice()).collect();
                    if client.process(time, &input_refs, &mut output_refs, nframes) {
                        interleave(&out_channels, outputs, data);
                    } else {
                        data.fill(0.0);
                    }
                },
                |err| tracing::warn!(%err, "output stream error"),
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        self._output_stream = Some(stream);

        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        Ok(())
    }

    /// Stops the streams; `run` returns shortly after.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Splits interleaved frames into per-channel buffers.
fn deinterleave(interleaved: &[f32], channels: usize, out: &mut [Vec<f32>]) {
    for (frame, samples) in interleaved.chunks(channels).enumerate() {
        for (channel, &sample) in samples.iter().enumerate() {
            out[channel][frame] = sample;
        }
    }
}

/// Joins per-channel buffers into interleaved frames.
fn interleave(channels: &[Vec<f32>], channel_count: usize, out: &mut [f32]) {
    for (frame, samples) in out.chunks_mut(channel_count).enumerate() {
        for (channel, sample) in samples.iter_mut().enumerate() {
            *sample = channels[channel][frame];
        }
    }
}

fn find_output_device(host: &Host, name: &str) -> Result<Device> {
    host.output_devices()
        .map_err(|e| Error::Stream(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
}

fn find_input_device(host: &Host, name: &str) -> Result<Device> {
    host.input_devices()
        .map_err(|e| Error::Stream(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
}
