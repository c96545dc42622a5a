//! Recording sink

use std::sync::Arc;

use tracing::warn;

use crate::cache::SampleCache;
use crate::listener::Message;
use crate::node::{Compute, ProcessContext};

/// Writes its inputs into a resident [`SampleCache`], one buffer per tick.
///
/// Stops (and reports itself finished, which deletes the node) once the cache
/// is full, unless it loops back to the start.
pub struct Recorder {
    cache: Arc<SampleCache>,
    position: u64,
    looping: bool,
    full: bool,
    warned: bool,
}

impl Recorder {
    pub fn new(cache: Arc<SampleCache>) -> Self {
        Self {
            cache,
            position: 0,
            looping: false,
            full: false,
            warned: false,
        }
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn cache(&self) -> &Arc<SampleCache> {
        &self.cache
    }

    /// Next frame to be written.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Compute for Recorder {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Vec<f32>], _outputs: &mut [Vec<f32>]) {
        if self.full {
            return;
        }
        let mut start = 0;
        let len = inputs.first().map_or(0, Vec::len);
        while start < len {
            let written = match self.cache.put_frames_from(self.position, inputs, start) {
                Ok(n) => n,
                Err(e) => {
                    if !self.warned {
                        warn!(error = %e, "recorder cannot write to its cache");
                        self.warned = true;
                    }
                    self.full = true;
                    return;
                }
            };
            self.position += written;
            start += written as usize;

            if self.position >= self.cache.num_frames() {
                if !self.looping || self.cache.num_frames() == 0 {
                    self.full = true;
                    return;
                }
                self.position = 0;
            }
        }
    }

    fn message(&mut self, msg: &Message) {
        if let Message::Trigger = msg {
            self.position = 0;
            self.full = false;
        }
    }

    fn num_inputs(&self) -> usize {
        self.cache.channels()
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn is_finished(&self) -> bool {
        self.full
    }
}
