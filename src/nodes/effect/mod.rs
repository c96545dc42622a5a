//! Effect nodes (process inputs into outputs)

mod gain;

pub use gain::Gain;
