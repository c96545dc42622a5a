//! Built-in nodes.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`Sine`] - Wavetable sine oscillator
//! - [`SamplePlayer`] - Interpolating reader over a [`SampleCache`](crate::SampleCache)
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`] - Volume control with smoothing
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio or time with no audio outputs. Wire them in as dependents:
//! - [`Clock`] - Broadcasts [`Message::Tick`](crate::Message::Tick) pulses to a listener group
//! - [`Recorder`] - Writes its inputs into a resident sample cache
//!
//! # Parameters
//!
//! Nodes react to [`Message::Param`](crate::Message::Param) sent through their
//! [`Mailbox`](crate::Mailbox):
//! - [`Sine`]: `"frequency"`, `"amplitude"`
//! - [`SamplePlayer`]: `"rate"`, `"volume"`, `"position"`
//! - [`Gain`]: `"gain"`
//! - [`Clock`]: `"interval"` (milliseconds)

pub mod effect;
pub mod sink;
pub mod source;

pub use effect::Gain;
pub use sink::{Clock, Recorder};
pub use source::{Interpolation, SamplePlayer, Sine};
