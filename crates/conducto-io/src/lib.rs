//! Audio I/O layer for the Conducto framework.
//!
//! This crate provides the audio-server role: it owns the cpal device
//! streams and drives any [`AudioClient`](conducto_core::AudioClient)
//! with fixed-size, per-channel, non-interleaved blocks and a monotonic
//! nanosecond timestamp.

mod server;

pub use server::{default_output_device, list_output_devices, AudioServer, ServerConfig};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("no audio device available")]
    NoDevice,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("client refused configuration: {0}")]
    Config(#[from] conducto_core::ClientError),
}

pub type Result<T> = std::result::Result<T, Error>;
