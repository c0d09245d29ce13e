//! Conducto Core - pull-based audio pipe graph
//!
//! This crate provides the substrate of the Conducto framework:
//!
//! - [`Buffer`] fixed-size sample blocks
//! - [`AudioOp`] the external DSP operator contract
//! - [`Unit`] and [`Rack`] - pipe behavior and the arena that schedules it
//! - [`units`] - the canonical fan-in, fan-out, accumulator and op pipes
//! - [`PipesClient`] - the audio-callback adapter with internal sub-blocking
//!
//! Evaluation is pull-based: each device output sink pulls one block from
//! its source per callback, recursion memoizes on the block time so every
//! pipe processes at most once per block, and linear 1-to-1 chains run in
//! place through a single buffer.
//!
//! ## no_std Support
//!
//! The graph substrate is `no_std` compatible (the client adapter needs
//! `std`). Use `default-features = false` in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! conducto-core = { version = "0.1", default-features = false }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod buffer;
pub mod op;
pub mod pipe;
pub mod rack;
pub mod units;

#[cfg(feature = "std")]
pub mod client;

// Re-export main types at crate root
pub use buffer::Buffer;
pub use op::AudioOp;
pub use pipe::{PipeId, Unit};
pub use rack::{PatchError, Rack};
pub use units::{Add, Func, Mod, OpPipe, Tee};

#[cfg(feature = "std")]
pub use client::{AudioClient, AudioConfig, ClientError, Listener, ListenerId, PipesClient};
