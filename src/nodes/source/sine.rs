//! Sine wave oscillator

use std::sync::Arc;

use crate::context::Context;
use crate::listener::Message;
use crate::node::{Compute, ProcessContext};

const TABLE_LEN: usize = 4096;

/// A wavetable sine oscillator (mono source).
///
/// Every `Sine` built from the same [`Context`] shares one table.
pub struct Sine {
    table: Arc<[f32]>,
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

impl Sine {
    pub fn new(context: &mut Context, frequency: f32) -> Self {
        // one guard point past the end so interpolation never wraps
        let table = context.table("sine", TABLE_LEN + 1, |i| {
            (i as f32 / TABLE_LEN as f32 * core::f32::consts::TAU).sin()
        });
        Self {
            table,
            frequency: frequency.max(0.0),
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency.max(0.0);
    }
}

impl Compute for Sine {
    fn process(&mut self, ctx: &ProcessContext, _inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;
        let table = &*self.table;

        for sample in first.iter_mut() {
            let pos = self.phase * TABLE_LEN as f32;
            let idx = (pos as usize).min(TABLE_LEN - 1);
            let frac = pos - idx as f32;
            *sample = (table[idx] + frac * (table[idx + 1] - table[idx])) * amplitude;

            self.phase += phase_inc;
            self.phase -= self.phase.floor();
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    fn message(&mut self, msg: &Message) {
        match *msg {
            Message::Param("frequency", f) => self.set_frequency(f),
            Message::Param("amplitude", a) => self.amplitude = a.clamp(0.0, 1.0),
            Message::Trigger => self.phase = 0.0,
            _ => {}
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        0
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}
