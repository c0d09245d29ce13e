//! Canonical pipe units: fan-in, fan-out, accumulation, and op adapters.

mod add;
mod func;
mod modulate;
mod op_pipe;
mod tee;

pub use add::Add;
pub use func::Func;
pub use modulate::Mod;
pub use op_pipe::OpPipe;
pub use tee::Tee;
