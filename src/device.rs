//! Output devices the [`Driver`](crate::Driver) writes to.
//!
//! An [`OutputDevice`] accepts interleaved frames already packed in its
//! [`OutputFormat`]. `write` blocks until the device has room; that wait is
//! what paces the driver in real time.
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! use schall::CpalDevice;
//!
//! for (i, device) in CpalDevice::list_outputs().iter().enumerate() {
//!     println!("[{}] {} ({} Hz, {} ch)",
//!         i, device.name(), device.sample_rate(), device.channels());
//! }
//!
//! ```
//!
//! With the `cpal_sink` feature, [`CpalDevice::open`] starts a stream and
//! returns a `CpalOutput` ready to hand to a driver.

use std::time::Duration;

#[cfg(feature = "cpal_sink")]
use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::Result;
use crate::format::SampleFormat;

/// Layout of the bytes an [`OutputDevice`] accepts.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub sample: SampleFormat,
}

impl OutputFormat {
    pub fn new(sample_rate: u32, channels: usize, sample: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            sample,
        }
    }

    /// Bytes in one interleaved frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.sample.frame_bytes(self.channels)
    }

    /// Wall-clock length of `frames` frames.
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        let nanos = frames as u128 * 1_000_000_000 / self.sample_rate.max(1) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

/// A sink for packed, interleaved audio.
pub trait OutputDevice: Send {
    fn format(&self) -> OutputFormat;

    /// Hand `bytes` (a whole number of frames) to the device, blocking until
    /// all of it is accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Block until everything written so far has been played.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the device. Further writes fail.
    fn close(&mut self) {}
}

/// Accepts and discards everything without blocking.
#[derive(Clone, Debug)]
pub struct NullDevice {
    format: OutputFormat,
    bytes_written: u64,
}

impl NullDevice {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl OutputDevice for NullDevice {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices, then
/// [`open`](Self::open) it to get an [`OutputDevice`].
pub struct CpalDevice {
    #[cfg(feature = "cpal_sink")]
    device: cpal::Device,
    #[cfg(feature = "cpal_sink")]
    config: cpal::SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        Self::describe(device)
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn default_output() -> Option<Self> {
        None
    }

    /// List all available audio output devices.
    ///
    /// Returns an empty list if no devices are found or if enumeration fails.
    #[cfg(feature = "cpal_sink")]
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::describe).collect())
            .unwrap_or_default()
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn list_outputs() -> Vec<Self> {
        Vec::new()
    }

    #[cfg(feature = "cpal_sink")]
    fn describe(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device's sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Start an output stream buffering roughly `buffer_hint` of audio.
    #[cfg(feature = "cpal_sink")]
    pub fn open(&self, buffer_hint: Duration) -> Result<cpal_output::CpalOutput> {
        cpal_output::CpalOutput::new(&self.device, &self.config, buffer_hint)
    }
}

#[cfg(feature = "cpal_sink")]
pub use cpal_output::CpalOutput;

#[cfg(feature = "cpal_sink")]
mod cpal_output {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::SupportedStreamConfig;
    use dasp_sample::FromSample;
    use rtrb::{Consumer, Producer, RingBuffer};
    use tracing::{debug, error, warn};

    use super::{OutputDevice, OutputFormat};
    use crate::error::{Error, Result};
    use crate::format::SampleFormat;

    /// A running cpal stream fed through a byte ring.
    ///
    /// The cpal stream lives on its own thread; `write` pushes packed `f32`
    /// frames into the ring and the stream callback converts them to whatever
    /// sample type the device wants.
    pub struct CpalOutput {
        ring: Producer<u8>,
        format: OutputFormat,
        shared: Arc<Shared>,
        thread: Option<JoinHandle<()>>,
    }

    #[derive(Default)]
    struct Shared {
        failed: AtomicBool,
        closed: AtomicBool,
        underruns: AtomicUsize,
    }

    impl CpalOutput {
        pub(super) fn new(
            device: &cpal::Device,
            config: &SupportedStreamConfig,
            buffer_hint: Duration,
        ) -> Result<Self> {
            let sample_format = config.sample_format();
            let stream_config = config.config();
            let format = OutputFormat::new(
                stream_config.sample_rate.0,
                stream_config.channels as usize,
                SampleFormat::F32_LE,
            );

            let frames = (buffer_hint.as_secs_f64() * format.sample_rate as f64) as usize;
            let capacity = (frames.max(256) * format.frame_bytes()).next_power_of_two();
            let (producer, consumer) = RingBuffer::<u8>::new(capacity);

            let shared = Arc::new(Shared::default());
            let thread_shared = shared.clone();
            let device = device.clone();

            let thread = std::thread::Builder::new()
                .name("schall-cpal".into())
                .spawn(move || {
                    let stream = match build_stream(&device, sample_format, &stream_config, consumer, &thread_shared) {
                        Ok(stream) => stream,
                        Err(e) => {
                            error!(error = %e, "failed to build output stream");
                            thread_shared.failed.store(true, Ordering::Release);
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        error!(error = %e, "failed to start output stream");
                        thread_shared.failed.store(true, Ordering::Release);
                        return;
                    }

                    // the stream lives as long as this thread
                    while !thread_shared.closed.load(Ordering::Acquire) {
                        std::thread::park();
                    }
                    debug!("output stream closed");
                })?;

            Ok(Self {
                ring: producer,
                format,
                shared,
                thread: Some(thread),
            })
        }

        /// Number of callbacks that ran out of data.
        pub fn underruns(&self) -> usize {
            self.shared.underruns.load(Ordering::Relaxed)
        }

        fn check(&self) -> Result<()> {
            if self.shared.failed.load(Ordering::Acquire) || self.ring.is_abandoned() {
                return Err(Error::Stream("output stream is not running".into()));
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::DeviceUnavailable("output closed".into()));
            }
            Ok(())
        }

        fn wait(&self) {
            // a tenth of the ring, or at least a millisecond
            let ring = self.format.frames_to_duration(self.ring.buffer().capacity() / self.format.frame_bytes());
            std::thread::sleep((ring / 10).max(Duration::from_millis(1)));
        }
    }

    impl OutputDevice for CpalOutput {
        fn format(&self) -> OutputFormat {
            self.format
        }

        fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
            while !bytes.is_empty() {
                self.check()?;
                let n = self.ring.slots().min(bytes.len());
                if n == 0 {
                    self.wait();
                    continue;
                }
                let (now, later) = bytes.split_at(n);
                for &b in now {
                    if self.ring.push(b).is_err() {
                        break;
                    }
                }
                bytes = later;
            }
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            let capacity = self.ring.buffer().capacity();
            while self.ring.slots() < capacity {
                self.check()?;
                self.wait();
            }
            Ok(())
        }

        fn close(&mut self) {
            self.shared.closed.store(true, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                thread.thread().unpark();
                let _ = thread.join();
            }
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: cpal::SampleFormat,
        config: &cpal::StreamConfig,
        consumer: Consumer<u8>,
        shared: &Arc<Shared>,
    ) -> Result<cpal::Stream> {
        match sample_format {
            cpal::SampleFormat::F32 => build_typed::<f32>(device, config, consumer, shared),
            cpal::SampleFormat::I16 => build_typed::<i16>(device, config, consumer, shared),
            cpal::SampleFormat::U16 => build_typed::<u16>(device, config, consumer, shared),
            cpal::SampleFormat::I32 => build_typed::<i32>(device, config, consumer, shared),
            cpal::SampleFormat::U8 => build_typed::<u8>(device, config, consumer, shared),
            other => Err(Error::UnsupportedFormat(format!("{other:?}"))),
        }
    }

    fn build_typed<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: Consumer<u8>,
        shared: &Arc<Shared>,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + FromSample<f32>,
    {
        let callback_shared = shared.clone();
        let error_shared = shared.clone();
        let format = SampleFormat::F32_LE;
        let depth = format.byte_depth();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _| {
                    let mut underrun = false;
                    let mut packed = [0u8; 4];
                    for sample in data.iter_mut() {
                        let value = if consumer.slots() >= depth {
                            for b in packed.iter_mut().take(depth) {
                                *b = consumer.pop().unwrap_or(0);
                            }
                            format.decode(&packed[..depth])
                        } else {
                            underrun = true;
                            0.0
                        };
                        *sample = T::from_sample_(value);
                    }
                    if underrun {
                        callback_shared.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    warn!(error = %err, "output stream error");
                    error_shared.failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))
    }
}
