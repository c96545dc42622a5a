//! Source nodes (generators with no audio inputs)

mod player;
mod sine;

pub use player::{Interpolation, SamplePlayer};
pub use sine::Sine;
