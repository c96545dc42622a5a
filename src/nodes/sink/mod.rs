//! Sink nodes (no audio outputs, pulled as dependents)

mod clock;
mod recorder;

pub use clock::Clock;
pub use recorder::Recorder;
