//! Core node trait and context types.

use core::any::Any;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::listener::Message;

/// Information available during audio processing.
///
/// Passed to every [`Compute::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Frames per tick; every input and output buffer has this length
    pub buffer_len: usize,
    /// The tick being computed
    pub tick: u64,
}

impl ProcessContext {
    /// Convert a frame count to milliseconds at the graph rate.
    #[inline]
    pub fn samples_to_ms(&self, samples: f64) -> f64 {
        samples * 1000.0 / self.sample_rate as f64
    }

    /// Convert milliseconds to a frame count at the graph rate.
    #[inline]
    pub fn ms_to_samples(&self, ms: f64) -> f64 {
        ms * self.sample_rate as f64 / 1000.0
    }

    /// Wall-clock position of the start of this tick, in milliseconds.
    #[inline]
    pub fn time_ms(&self) -> f64 {
        self.samples_to_ms((self.tick * self.buffer_len as u64) as f64)
    }
}

/// Stable handle to a node in a [`Graph`](crate::Graph).
///
/// Ids carry a generation so a handle to a swept node never aliases the
/// node that later reuses its slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// What a paused node presents as output while paused.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PausePolicy {
    /// Output buffers are cleared when the node is paused.
    #[default]
    Zero,
    /// Output buffers keep the last computed block.
    Retain,
}

/// How output buffers are prepared before each computation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum OutputInit {
    /// Zero every output buffer before calling [`Compute::process`].
    Zero,
    /// Hand the previous block to [`Compute::process`] untouched.
    #[default]
    Retain,
}

/// Helper supertrait so graph nodes can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The per-tick computation of a unit generator.
///
/// Implement this trait to create custom audio nodes. Nodes can be:
/// - **Sources**: Generate audio (0 inputs, 1+ outputs) - oscillators, sample players
/// - **Effects**: Process audio (1+ inputs, 1+ outputs) - gain, filters, delays
/// - **Sinks**: Consume audio or time (0 outputs) - recorders, clocks
///
/// The graph owns the buffers. By the time `process` runs, every input channel
/// holds the sum of its sources for the current tick; `process` fills `outputs`.
///
/// ```
/// use schall::{Compute, Message, ProcessContext};
///
/// struct Offset {
///     amount: f32,
/// }
///
/// impl Compute for Offset {
///     fn process(&mut self, _ctx: &ProcessContext, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
///         for (out, input) in outputs[0].iter_mut().zip(&inputs[0]) {
///             *out = *input + self.amount;
///         }
///     }
///
///     fn message(&mut self, msg: &Message) {
///         if let Message::Param("amount", v) = msg {
///             self.amount = *v;
///         }
///     }
///
///     fn num_inputs(&self) -> usize { 1 }
/// }
/// ```
pub trait Compute: AsAny + Send {
    /// Fill `outputs` for the current tick from `inputs`.
    fn process(&mut self, ctx: &ProcessContext, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]);

    /// Handle a message queued through the node's [`Mailbox`](crate::Mailbox).
    ///
    /// Called at the start of the node's next evaluation, before `process`.
    fn message(&mut self, _msg: &Message) {}

    /// Number of audio input channels (0 for sources).
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of audio output channels.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Return `true` once the node has nothing more to do; the graph kills it
    /// after the current tick.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Lifecycle flags shared between a node's graph slot and its mailboxes.
#[derive(Debug, Default)]
pub(crate) struct NodeFlags {
    paused: AtomicBool,
    deleted: AtomicBool,
}

impl NodeFlags {
    #[inline]
    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Mark deleted. Returns `true` if this call made the transition.
    #[inline]
    pub(crate) fn kill(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }
}
