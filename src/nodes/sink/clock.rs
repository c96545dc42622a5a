//! Timing source

use crate::listener::{Listener, ListenerGroup, Message};
use crate::node::{Compute, ProcessContext};

/// Broadcasts [`Message::Tick`] every `interval` milliseconds.
///
/// A clock has no inputs or outputs; add it as a dependent of whatever node
/// the driver pulls so it runs every tick. Pulses land on buffer boundaries,
/// so their timing is quantised to the buffer length. Every
/// `ticks_per_beat`-th pulse is flagged as a beat.
pub struct Clock {
    listeners: ListenerGroup,
    interval_ms: f64,
    ticks_per_beat: u64,
    /// Samples left until the next pulse.
    remaining: f64,
    count: u64,
}

impl Clock {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            listeners: ListenerGroup::new(),
            interval_ms: interval_ms.max(0.001),
            ticks_per_beat: 4,
            remaining: 0.0,
            count: 0,
        }
    }

    pub fn with_ticks_per_beat(mut self, ticks: u64) -> Self {
        self.ticks_per_beat = ticks.max(1);
        self
    }

    /// Add a listener for pulses.
    pub fn with_listener<L: Listener + 'static>(mut self, listener: L) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerGroup {
        &mut self.listeners
    }

    #[inline]
    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    /// Pulses sent so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Compute for Clock {
    fn process(&mut self, ctx: &ProcessContext, _inputs: &[Vec<f32>], _outputs: &mut [Vec<f32>]) {
        let interval = ctx.ms_to_samples(self.interval_ms).max(1.0);
        while self.remaining <= 0.0 {
            let beat = self.count % self.ticks_per_beat == 0;
            self.listeners.broadcast(&Message::Tick {
                count: self.count,
                beat,
            });
            self.count += 1;
            self.remaining += interval;
        }
        self.remaining -= ctx.buffer_len as f64;
    }

    fn message(&mut self, msg: &Message) {
        match *msg {
            Message::Param("interval", ms) => self.interval_ms = (ms as f64).max(0.001),
            Message::Trigger => {
                self.remaining = 0.0;
                self.count = 0;
            }
            _ => {}
        }
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        0
    }
}
