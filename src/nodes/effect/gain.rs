//! Gain/volume control effect

use crate::listener::Message;
use crate::node::{Compute, ProcessContext};

/// A gain (volume) control that passes audio through with amplitude scaling.
///
/// Each input channel maps to the output channel with the same index.
pub struct Gain {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    channels: usize,
}

impl Gain {
    /// Create a stereo gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~4ms at 48kHz
            channels: 2,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        // after `ms` milliseconds we've covered ~63% of the way to the target
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Compute for Gain {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let start_gain = self.smoothed_gain;
        let mut end_gain = start_gain;

        for (ch, (out_buffer, in_buffer)) in outputs.iter_mut().zip(inputs.iter()).enumerate() {
            // every channel follows the same ramp
            let mut gain = start_gain;
            for (out_sample, &in_sample) in out_buffer.iter_mut().zip(in_buffer.iter()) {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample = in_sample * gain;
            }
            if ch == 0 {
                end_gain = gain;
            }
        }

        self.smoothed_gain = end_gain;
    }

    fn message(&mut self, msg: &Message) {
        if let Message::Param("gain", g) = *msg {
            self.gain = g;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        self.channels
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsmoothed_gain_scales_every_channel() {
        let ctx = ProcessContext {
            sample_rate: 48_000,
            buffer_len: 3,
            tick: 0,
        };
        let mut gain = Gain::new(0.5).without_smoothing();
        let inputs = vec![vec![1.0, -1.0, 0.5], vec![2.0, 0.0, -2.0]];
        let mut outputs = vec![vec![0.0; 3]; 2];

        gain.process(&ctx, &inputs, &mut outputs);
        assert_eq!(outputs[0], vec![0.5, -0.5, 0.25]);
        assert_eq!(outputs[1], vec![1.0, 0.0, -1.0]);

        gain.message(&Message::Param("gain", 2.0));
        gain.process(&ctx, &inputs, &mut outputs);
        assert_eq!(outputs[0], vec![2.0, -2.0, 1.0]);
    }
}
