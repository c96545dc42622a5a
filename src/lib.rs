//! # Schall
//!
//! A pull-based unit generator graph, a real-time driver that feeds it to an
//! output device, and a sample cache that can stream files too large to hold
//! in memory.
//!
//! ## Quick Start
//!
//! ```
//! use schall::{Context, Driver, Graph, NullDevice, OutputFormat, SampleFormat};
//! use schall::nodes::{Gain, Sine};
//!
//! let mut context = Context::new();
//! let mut graph = Graph::new(48_000, 512);
//!
//! let sine = graph.add(Sine::new(&mut context, 440.0));
//! let gain = graph.add(Gain::new(0.5).with_channels(1));
//! graph.connect(sine, 0, gain, 0);
//!
//! let device = NullDevice::new(OutputFormat::new(48_000, 2, SampleFormat::I16_LE));
//! let mut driver = Driver::new(graph, gain, Box::new(device));
//! for _ in 0..8 {
//!     driver.step();
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Graph`] owns every node in an arena addressed by [`NodeId`]. Evaluating
//!   a node pulls its dependents and sources first, and each node runs at most
//!   once per tick, so shared ancestors and feedback wires are safe.
//! - Nodes implement [`Compute`]. They are paused, resumed and killed through
//!   the graph or through a [`Mailbox`], which also carries [`Message`]s to
//!   [`Compute::message`] from any thread.
//! - [`ListenerGroup`] broadcasts messages to a self-pruning list of listeners
//!   without knowing their concrete types.
//! - [`Driver`] pulls a root node once per buffer, packs the result for an
//!   [`OutputDevice`], and drops a buffer whenever it falls a tick behind.
//! - [`SampleCache`] holds decoded audio either resident or streamed through
//!   regions loaded by a background thread and evicted when they go stale.
//!
//! ## Features
//!
//! - `cpal_sink`: real output devices through cpal ([`CpalDevice`])
//! - `vorbis_src`: Ogg/Vorbis sources through lewton

pub mod cache;
mod context;
mod device;
mod driver;
mod error;
mod format;
mod graph;
mod listener;
mod node;
pub mod nodes;
pub mod source;

pub use cache::{BufferingMode, CacheConfig, LoadOrder, SampleCache};
pub use context::Context;
pub use device::{CpalDevice, NullDevice, OutputDevice, OutputFormat};
pub use driver::{Driver, DriverConfig, DriverStats, MonotonicTimer, RunningDriver, TickOutcome, Timer};
pub use error::{Error, Result};
pub use format::{Encoding, Endian, SampleFormat};
pub use graph::Graph;
pub use listener::{Listener, ListenerGroup, Mailbox, Message, MAILBOX_CAPACITY};
pub use node::{AsAny, Compute, NodeId, OutputInit, PausePolicy, ProcessContext};
pub use source::{AudioSource, SourceInfo};

#[cfg(feature = "cpal_sink")]
pub use device::CpalOutput;
