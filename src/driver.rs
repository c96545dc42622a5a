//! Driver - pulls the graph once per buffer and feeds an output device.
//!
//! Each tick the driver evaluates its root node, interleaves the root's output
//! channels, packs them in the device's sample format and writes them. The
//! device write blocks until there is room, which is what keeps the loop in
//! step with the hardware.
//!
//! After every tick the driver compares the wall-clock time since it started
//! against the time the ticks so far should have taken. If it has fallen more
//! than one tick behind, the next buffer is dropped instead of rendered, so
//! the output catches up rather than drifting further late.
//!
//! # Example: offline rendering
//!
//! ```
//! use schall::{Driver, Graph, NullDevice, OutputFormat, SampleFormat};
//! use schall::nodes::Sine;
//! use schall::Context;
//!
//! let mut context = Context::new();
//! let mut graph = Graph::new(48_000, 256);
//! let sine = graph.add(Sine::new(&mut context, 440.0));
//!
//! let device = NullDevice::new(OutputFormat::new(48_000, 2, SampleFormat::F32_LE));
//! let mut driver = Driver::new(graph, sine, Box::new(device));
//!
//! let mut peak = 0.0f32;
//! driver.run_non_realtime(10, |frames| {
//!     peak = frames.iter().fold(peak, |p, s| p.max(s.abs()));
//! });
//! assert!(peak > 0.0);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::device::{OutputDevice, OutputFormat};
use crate::error::Result;
use crate::graph::Graph;
use crate::node::NodeId;

/// Wall-clock source for deadline checks.
pub trait Timer: Send {
    /// Reset the zero point to now.
    fn restart(&mut self);

    /// Time since the last restart.
    fn elapsed(&self) -> Duration;
}

/// [`Timer`] backed by [`Instant`].
#[derive(Clone, Copy, Debug)]
pub struct MonotonicTimer {
    start: Instant,
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Timer for MonotonicTimer {
    fn restart(&mut self) {
        self.start = Instant::now();
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Driver tuning.
#[derive(Clone, Copy, Debug)]
pub struct DriverConfig {
    /// Drop a buffer after a tick that finishes more than one tick late.
    pub skip_late: bool,
    /// Let the device play out what it holds when [`Driver::run`] stops.
    pub drain_on_stop: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            skip_late: true,
            drain_on_stop: true,
        }
    }
}

impl DriverConfig {
    pub fn without_skipping(mut self) -> Self {
        self.skip_late = false;
        self
    }

    pub fn without_drain(mut self) -> Self {
        self.drain_on_stop = false;
        self
    }
}

/// What happened during one [`Driver::step`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TickOutcome {
    /// The graph was pulled and the buffer handed to the device.
    Written,
    /// The tick was dropped to catch up with the clock.
    Skipped,
}

/// Counters since the driver was created.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct DriverStats {
    pub written: u64,
    pub skipped: u64,
    pub device_errors: u64,
}

/// Owns a graph, its root node and an output device.
pub struct Driver {
    graph: Graph,
    root: NodeId,
    device: Box<dyn OutputDevice>,
    format: OutputFormat,
    config: DriverConfig,
    timer: Box<dyn Timer>,

    tick: u64,
    start_tick: u64,
    started: bool,
    skip_next: bool,
    /// Set while the device is failing, so an outage is logged once.
    device_failing: bool,

    interleaved: Vec<f32>,
    packed: Vec<u8>,
    stats: DriverStats,
}

impl Driver {
    /// Drive `graph` from `root` into `device`.
    ///
    /// The tick length is the graph's buffer length.
    pub fn new(graph: Graph, root: NodeId, device: Box<dyn OutputDevice>) -> Self {
        let format = device.format();
        if format.sample_rate != graph.sample_rate() {
            warn!(
                device = format.sample_rate,
                graph = graph.sample_rate(),
                "device and graph sample rates differ"
            );
        }
        let samples = graph.buffer_len() * format.channels;
        Self {
            graph,
            root,
            device,
            format,
            config: DriverConfig::default(),
            timer: Box::new(MonotonicTimer::default()),
            tick: 0,
            start_tick: 0,
            started: false,
            skip_next: false,
            device_failing: false,
            interleaved: vec![0.0; samples],
            packed: vec![0; samples * format.sample.byte_depth()],
            stats: DriverStats::default(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock used for deadline checks.
    pub fn with_timer<T: Timer + 'static>(mut self, timer: T) -> Self {
        self.timer = Box::new(timer);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    /// Ticks elapsed, skipped ones included.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Wall-clock length of one tick.
    pub fn tick_duration(&self) -> Duration {
        self.format.frames_to_duration(self.graph.buffer_len())
    }

    /// Run one tick against the clock.
    pub fn step(&mut self) -> TickOutcome {
        if !self.started {
            self.timer.restart();
            self.start_tick = self.tick;
            self.started = true;
        }
        let tick_duration = self.tick_duration();
        let elapsed_ticks = u32::try_from(self.tick - self.start_tick).unwrap_or(u32::MAX);
        let expected = tick_duration.checked_mul(elapsed_ticks).unwrap_or(Duration::MAX);

        let outcome = if self.skip_next {
            self.skip_next = false;
            self.stats.skipped += 1;
            warn!(tick = self.tick, "dropped buffer to catch up");
            TickOutcome::Skipped
        } else {
            self.render();
            self.write();
            self.stats.written += 1;
            TickOutcome::Written
        };

        let actual = self.timer.elapsed();
        if self.config.skip_late && outcome == TickOutcome::Written && actual > expected.saturating_add(tick_duration) {
            debug!(
                tick = self.tick,
                late_us = (actual - expected.saturating_add(tick_duration)).as_micros() as u64,
                "tick overran its deadline"
            );
            self.skip_next = true;
        }

        self.tick += 1;
        outcome
    }

    /// Pull the root for the current tick and interleave its output.
    fn render(&mut self) {
        self.graph.set_tick(self.tick);
        self.graph.update(self.root);

        let channels = self.format.channels;
        let samples = self.graph.buffer_len() * channels;
        if self.interleaved.len() != samples {
            self.interleaved.resize(samples, 0.0);
            self.packed.resize(samples * self.format.sample.byte_depth(), 0);
        }
        // a deleted root keeps its last block until swept; it must not replay
        if self.graph.is_deleted(self.root) {
            self.interleaved.fill(0.0);
            return;
        }
        let outputs = self.graph.outputs(self.root);
        if outputs.is_empty() {
            self.interleaved.fill(0.0);
            return;
        }
        for (i, frame) in self.interleaved.chunks_exact_mut(channels).enumerate() {
            for (ch, sample) in frame.iter_mut().enumerate() {
                // fewer root channels than device channels: repeat the last one
                let src = ch.min(outputs.len() - 1);
                *sample = outputs[src][i];
            }
        }
    }

    fn write(&mut self) {
        self.format.sample.encode_slice(&self.interleaved, &mut self.packed);
        match self.device.write(&self.packed) {
            Ok(()) => {
                if self.device_failing {
                    info!("output device recovered");
                    self.device_failing = false;
                }
            }
            Err(e) => {
                self.stats.device_errors += 1;
                if !self.device_failing {
                    error!(error = %e, "output device write failed");
                    self.device_failing = true;
                }
            }
        }
    }

    /// Tick until `running` is cleared. Finishes the current tick before returning.
    pub fn run(&mut self, running: &AtomicBool) {
        info!(
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            buffer_len = self.graph.buffer_len(),
            "driver started"
        );
        while running.load(Ordering::Acquire) {
            self.step();
        }
        if self.config.drain_on_stop {
            if let Err(e) = self.device.drain() {
                warn!(error = %e, "failed to drain output device");
            }
        }
        self.started = false;
        info!(ticks = self.tick, skipped = self.stats.skipped, "driver stopped");
    }

    /// Move the driver onto its own thread and start ticking.
    pub fn start(mut self) -> Result<RunningDriver> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("schall-driver".into())
            .spawn(move || {
                self.run(&flag);
                self
            })?;
        Ok(RunningDriver {
            running,
            thread: Some(thread),
        })
    }

    /// Render `ticks` buffers as fast as possible, without touching the device
    /// or the clock. `f` receives each interleaved buffer.
    pub fn run_non_realtime<F: FnMut(&[f32])>(&mut self, ticks: u64, mut f: F) {
        for _ in 0..ticks {
            self.render();
            f(&self.interleaved);
            self.stats.written += 1;
            self.tick += 1;
        }
    }

    /// Close the device and hand back the graph.
    pub fn into_graph(mut self) -> Graph {
        self.device.close();
        self.graph
    }
}

/// A driver ticking on its own thread.
pub struct RunningDriver {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Driver>>,
}

impl RunningDriver {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop after the current tick and get the driver back.
    ///
    /// Returns `None` if the driver thread panicked.
    pub fn stop(mut self) -> Option<Driver> {
        self.running.store(false, Ordering::Release);
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for RunningDriver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use crate::format::SampleFormat;
    use crate::node::{Compute, ProcessContext};

    struct Dc(f32);

    impl Compute for Dc {
        fn process(&mut self, _ctx: &ProcessContext, _inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
            outputs[0].fill(self.0);
        }
    }

    #[test]
    fn mono_root_fills_every_device_channel() {
        let mut graph = Graph::new(1000, 4);
        let dc = graph.add(Dc(0.5));
        let device = NullDevice::new(OutputFormat::new(1000, 3, SampleFormat::F32_LE));
        let mut driver = Driver::new(graph, dc, Box::new(device));

        let mut seen = Vec::new();
        driver.run_non_realtime(1, |frames| seen.extend_from_slice(frames));
        assert_eq!(seen, vec![0.5; 12]);
        assert_eq!(driver.tick(), 1);
    }

    #[test]
    fn killed_root_renders_silence() {
        let mut graph = Graph::new(1000, 4);
        let dc = graph.add(Dc(0.5));
        let device = NullDevice::new(OutputFormat::new(1000, 2, SampleFormat::F32_LE));
        let mut driver = Driver::new(graph, dc, Box::new(device));

        driver.run_non_realtime(1, |frames| assert_eq!(frames, &[0.5; 8]));
        driver.graph_mut().kill(dc);

        let mut after = Vec::new();
        driver.run_non_realtime(3, |frames| after.extend_from_slice(frames));
        assert_eq!(after, vec![0.0; 24]);

        driver.graph_mut().sweep();
        driver.run_non_realtime(1, |frames| assert_eq!(frames, &[0.0; 8]));
    }
}
