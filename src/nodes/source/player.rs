//! Sample player

use std::sync::Arc;

use crate::cache::{SampleCache, MAX_INTERP_CHANNELS};
use crate::listener::Message;
use crate::node::{Compute, ProcessContext};

/// How a [`SamplePlayer`] reads between frames.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Interpolation {
    /// Nearest earlier frame.
    None,
    #[default]
    Linear,
    Cubic,
}

/// Plays a [`SampleCache`], resident or streaming.
///
/// Playback speed is corrected for the difference between the cache's and
/// the graph's sample rates. Send [`Message::Trigger`] to restart from the
/// top. A player without looping that is set to
/// [`kill_on_end`](Self::kill_on_end) deletes itself when it runs out.
pub struct SamplePlayer {
    cache: Arc<SampleCache>,
    channels: usize,
    position: f64,
    rate: f64,
    volume: f32,
    looping: bool,
    kill_on_end: bool,
    finished: bool,
    interpolation: Interpolation,
    frame: [f32; MAX_INTERP_CHANNELS],
}

impl SamplePlayer {
    pub fn new(cache: Arc<SampleCache>) -> Self {
        let channels = cache.channels().min(MAX_INTERP_CHANNELS);
        Self {
            cache,
            channels,
            position: 0.0,
            rate: 1.0,
            volume: 1.0,
            looping: false,
            kill_on_end: false,
            finished: false,
            interpolation: Interpolation::default(),
            frame: [0.0; MAX_INTERP_CHANNELS],
        }
    }

    /// Output this many channels instead of the cache's own count.
    /// Extra channels repeat the source channels in order.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Delete the node once playback reaches the end.
    pub fn kill_on_end(mut self) -> Self {
        self.kill_on_end = true;
        self
    }

    pub fn cache(&self) -> &Arc<SampleCache> {
        &self.cache
    }

    /// Current read position in source frames.
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn set_position(&mut self, frame: f64) {
        self.position = frame.max(0.0);
        self.finished = false;
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        !self.finished
    }

    fn read(&mut self, pos: f64) {
        self.frame = [0.0; MAX_INTERP_CHANNELS];
        match self.interpolation {
            Interpolation::None => self.cache.get_frame(pos as u64, &mut self.frame),
            Interpolation::Linear => self.cache.get_frame_linear(pos, &mut self.frame),
            Interpolation::Cubic => self.cache.get_frame_cubic(pos, &mut self.frame),
        }
    }
}

impl Compute for SamplePlayer {
    fn process(&mut self, ctx: &ProcessContext, _inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
        if self.finished {
            outputs.iter_mut().for_each(|b| b.fill(0.0));
            return;
        }

        let len = self.cache.num_frames() as f64;
        let step = self.rate * self.cache.sample_rate() as f64 / ctx.sample_rate.max(1) as f64;
        let src_channels = self.cache.channels().clamp(1, MAX_INTERP_CHANNELS);

        for i in 0..ctx.buffer_len {
            if self.position >= len || self.position < 0.0 {
                if self.looping && len > 0.0 {
                    self.position = self.position.rem_euclid(len);
                } else {
                    for buffer in outputs.iter_mut() {
                        buffer[i..].fill(0.0);
                    }
                    self.finished = true;
                    return;
                }
            }

            self.read(self.position);
            for (ch, buffer) in outputs.iter_mut().enumerate() {
                buffer[i] = self.frame[ch % src_channels] * self.volume;
            }
            self.position += step;
        }
    }

    fn message(&mut self, msg: &Message) {
        match *msg {
            Message::Trigger => self.set_position(0.0),
            Message::Param("rate", r) => self.rate = r as f64,
            Message::Param("volume", v) => self.volume = v.clamp(0.0, 2.0),
            Message::Param("position", p) => self.set_position(p as f64),
            _ => {}
        }
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn is_finished(&self) -> bool {
        self.finished && self.kill_on_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(buffer_len: usize) -> ProcessContext {
        ProcessContext {
            sample_rate: 100,
            buffer_len,
            tick: 0,
        }
    }

    #[test]
    fn plays_then_finishes() {
        let cache = Arc::new(SampleCache::from_samples(&[0.1, 0.2, 0.3], 1, 100));
        let mut player = SamplePlayer::new(cache).kill_on_end();
        let mut out = vec![vec![9.0; 5]];

        player.process(&ctx(5), &[], &mut out);
        assert_eq!(out[0][..3], [0.1, 0.2, 0.3]);
        assert_eq!(out[0][3..], [0.0, 0.0]);
        assert!(player.is_finished());

        player.message(&Message::Trigger);
        assert!(!player.is_finished());
    }

    #[test]
    fn loops_around() {
        let cache = Arc::new(SampleCache::from_samples(&[0.5, -0.5], 1, 100));
        let mut player = SamplePlayer::new(cache).with_looping(true);
        let mut out = vec![vec![0.0; 5]];

        player.process(&ctx(5), &[], &mut out);
        assert_eq!(out[0], vec![0.5, -0.5, 0.5, -0.5, 0.5]);
        assert!(player.is_playing());
    }
}
