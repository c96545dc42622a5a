use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schall::{
    Compute, Driver, DriverConfig, Error, Graph, NullDevice, OutputDevice, OutputFormat, ProcessContext, Result,
    SampleFormat, TickOutcome, Timer,
};

/// A clock that only moves when told to.
#[derive(Clone, Default)]
struct FakeClock(Arc<AtomicU64>);

impl FakeClock {
    fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Timer for FakeClock {
    fn restart(&mut self) {
        self.0.store(0, Ordering::SeqCst);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::SeqCst))
    }
}

/// Takes one tick of wall-clock time per write, like a device with no slack.
struct PacedDevice {
    format: OutputFormat,
    clock: FakeClock,
    per_write: Duration,
    writes: Arc<AtomicUsize>,
}

impl OutputDevice for PacedDevice {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        assert_eq!(bytes.len() % self.format.frame_bytes(), 0);
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.clock.advance(self.per_write);
        Ok(())
    }
}

/// Burns fake time while processing one particular tick.
struct Stall {
    clock: FakeClock,
    on_tick: u64,
    by: Duration,
}

impl Compute for Stall {
    fn process(&mut self, ctx: &ProcessContext, _inputs: &[Vec<f32>], outputs: &mut [Vec<f32>]) {
        if ctx.tick == self.on_tick {
            self.clock.advance(self.by);
        }
        outputs[0].fill(0.1);
    }
}

const TICK: Duration = Duration::from_millis(10);

fn paced_driver(stall_tick: u64, stall: Duration, config: DriverConfig) -> (Driver, Arc<AtomicUsize>) {
    let clock = FakeClock::default();
    let writes = Arc::new(AtomicUsize::new(0));
    let format = OutputFormat::new(1000, 2, SampleFormat::I16_LE);

    // 1000 Hz, 10 frames per tick -> 10 ms ticks
    let mut graph = Graph::new(1000, 10);
    let root = graph.add(Stall {
        clock: clock.clone(),
        on_tick: stall_tick,
        by: stall,
    });
    let device = PacedDevice {
        format,
        clock: clock.clone(),
        per_write: TICK,
        writes: writes.clone(),
    };
    let driver = Driver::new(graph, root, Box::new(device))
        .with_config(config)
        .with_timer(clock);
    (driver, writes)
}

#[test]
fn on_time_ticks_are_all_written() {
    let (mut driver, writes) = paced_driver(u64::MAX, Duration::ZERO, DriverConfig::default());
    assert_eq!(driver.tick_duration(), TICK);
    for _ in 0..20 {
        assert_eq!(driver.step(), TickOutcome::Written);
    }
    assert_eq!(writes.load(Ordering::SeqCst), 20);
    assert_eq!(driver.tick(), 20);
    assert_eq!(driver.stats().skipped, 0);
}

#[test]
fn late_tick_skips_the_next_one() {
    let (mut driver, writes) = paced_driver(2, Duration::from_millis(25), DriverConfig::default());

    assert_eq!(driver.step(), TickOutcome::Written);
    assert_eq!(driver.step(), TickOutcome::Written);
    // this one stalls and finishes 25 ms late
    assert_eq!(driver.step(), TickOutcome::Written);
    assert_eq!(writes.load(Ordering::SeqCst), 3);
    assert_eq!(driver.tick(), 3);

    assert_eq!(driver.step(), TickOutcome::Skipped);
    assert_eq!(writes.load(Ordering::SeqCst), 3);
    assert_eq!(driver.tick(), 4);
    assert_eq!(driver.stats().skipped, 1);
    assert_eq!(driver.stats().written, 3);
}

#[test]
fn skipping_can_be_disabled() {
    let (mut driver, writes) = paced_driver(2, Duration::from_millis(25), DriverConfig::default().without_skipping());
    for _ in 0..5 {
        assert_eq!(driver.step(), TickOutcome::Written);
    }
    assert_eq!(writes.load(Ordering::SeqCst), 5);
}

struct BrokenDevice {
    attempts: Arc<AtomicUsize>,
}

impl OutputDevice for BrokenDevice {
    fn format(&self) -> OutputFormat {
        OutputFormat::new(1000, 1, SampleFormat::F32_LE)
    }

    fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::DeviceUnavailable("unplugged".into()))
    }
}

#[test]
fn device_errors_do_not_stop_the_loop() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut graph = Graph::new(1000, 10);
    let root = graph.add(Stall {
        clock: FakeClock::default(),
        on_tick: u64::MAX,
        by: Duration::ZERO,
    });
    let device = BrokenDevice {
        attempts: attempts.clone(),
    };
    let mut driver = Driver::new(graph, root, Box::new(device)).with_timer(FakeClock::default());

    for _ in 0..4 {
        driver.step();
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(driver.stats().device_errors, 4);
    assert_eq!(driver.tick(), 4);
}

#[test]
fn offline_render_hands_out_interleaved_buffers() {
    let mut graph = Graph::new(1000, 10);
    let root = graph.add(Stall {
        clock: FakeClock::default(),
        on_tick: u64::MAX,
        by: Duration::ZERO,
    });
    let device = NullDevice::new(OutputFormat::new(1000, 2, SampleFormat::F32_LE));
    let mut driver = Driver::new(graph, root, Box::new(device));

    let mut buffers = 0;
    driver.run_non_realtime(6, |frames| {
        assert_eq!(frames.len(), 20);
        assert!(frames.iter().all(|&s| s == 0.1));
        buffers += 1;
    });
    assert_eq!(buffers, 6);
    assert_eq!(driver.tick(), 6);
    assert_eq!(driver.graph().tick(), 5);
}

#[test]
fn started_driver_stops_and_comes_back() {
    let mut graph = Graph::new(1000, 10);
    let root = graph.add(Stall {
        clock: FakeClock::default(),
        on_tick: u64::MAX,
        by: Duration::ZERO,
    });
    let device = NullDevice::new(OutputFormat::new(1000, 2, SampleFormat::I16_LE));
    let driver = Driver::new(graph, root, Box::new(device)).with_config(DriverConfig::default().without_drain());

    let running = driver.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert!(running.is_running());

    let driver = running.stop().unwrap();
    assert!(driver.tick() > 0);
    assert_eq!(driver.stats().written, driver.tick() - driver.stats().skipped);
}
