//! Observability utilities.

mod subscriber;
mod timer;

pub use subscriber::{init_tracing, LogFormat};
pub use timer::{RunTimer, RunTiming};
