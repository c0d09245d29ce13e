//! Conducto Graph - patch composition over the pipe substrate
//!
//! This crate layers the user-facing pieces on top of `conducto-core`:
//!
//! - [`Graph`] and [`GraphCtx`] - boundary pipes, dependents, sample clock
//! - [`Patch`] - user graph logic with init/update hooks
//! - [`BlockScheduler`] / [`SchedulerHandle`] - sample-locked task execution
//! - [`Property`] with keyframe [`Animator`] and [`Easing`]
//! - [`Clock`] - tempo-aligned triggers
//! - [`Player`] - builder wiring a patch to an audio client
//!
//! Everything that touches graph state runs on the audio thread; control
//! threads reach in through the scheduler handle.

pub mod clock;
pub mod easing;
pub mod graph;
pub mod player;
pub mod property;
pub mod scheduler;

pub use clock::Clock;
pub use easing::Easing;
pub use graph::{ClockId, Dependent, DependentId, Graph, GraphCtx, Patch, PropertyId, Timebase};
pub use player::{Player, PlayerBuilder};
pub use property::{Animator, Property};
pub use scheduler::{BlockScheduler, ScheduleError, SchedulerHandle, TaskHandle};
