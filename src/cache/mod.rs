//! Sample data cache.
//!
//! A [`SampleCache`] holds one decoded audio source, either entirely in memory
//! ([`BufferingMode::Resident`]) or paged through fixed-length regions that are
//! loaded on demand and evicted when they go unused ([`BufferingMode::Streaming`]).
//!
//! Data is kept in the source's native [`SampleFormat`] and converted to `f32`
//! on every read. Reads never fail: frames that are out of range, or that
//! cannot be loaded in time, leave the caller's buffer untouched.
//!
//! # Example
//!
//! ```no_run
//! use schall::{CacheConfig, SampleCache};
//!
//! let cache = SampleCache::open("drums.wav", CacheConfig::streaming())?;
//! let mut frame = vec![0.0; cache.channels()];
//! cache.get_frame_linear(1234.5, &mut frame);
//! # Ok::<(), schall::Error>(())
//! ```

mod config;
mod loader;
mod stream;

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::format::{Encoding, Endian, SampleFormat};
use crate::source::{AudioSource, SourceInfo, WavFile};

pub use config::{BufferingMode, CacheConfig, LoadOrder};

use stream::Streamer;

/// Channels handled by the interpolating reads.
pub const MAX_INTERP_CHANNELS: usize = 16;

enum Storage {
    Resident(RwLock<Vec<u8>>),
    Streaming(Arc<Streamer>),
}

/// Decoded audio, resident or streamed.
pub struct SampleCache {
    info: SourceInfo,
    storage: Storage,
    loader: Option<JoinHandle<()>>,
}

impl SampleCache {
    /// Bind a cache to `source`.
    ///
    /// Resident caches read the whole source before returning. Streaming
    /// caches only compute region geometry and (optionally) start the loader.
    /// Sources of unknown length are always decoded resident.
    pub fn new<S: AudioSource + 'static>(source: S, config: CacheConfig) -> Result<Self> {
        Self::from_boxed(Box::new(source), config)
    }

    pub fn from_boxed(mut source: Box<dyn AudioSource>, config: CacheConfig) -> Result<Self> {
        source.open()?;
        let info = *source.info();

        let streaming = match (config.mode, info.frames) {
            (BufferingMode::Resident, _) => false,
            (_, None) => {
                if config.mode == BufferingMode::Streaming {
                    warn!("source length unknown, decoding resident instead of streaming");
                }
                false
            }
            (BufferingMode::Streaming, Some(_)) => true,
            (BufferingMode::Auto, Some(_)) => info.duration().map_or(false, |d| d > config.resident_threshold),
        };

        if !streaming {
            let bytes = read_all(source.as_mut(), &info)?;
            let frames = (bytes.len() / info.frame_bytes()) as u64;
            debug!(frames, channels = info.channels, "decoded resident sample");
            return Ok(Self {
                info: SourceInfo {
                    frames: Some(frames),
                    ..info
                },
                storage: Storage::Resident(RwLock::new(bytes)),
                loader: None,
            });
        }

        let frames = info.frames.ok_or(Error::UnknownLength)?;
        let streamer = Arc::new(Streamer::new(source, frames, config));
        info!(
            frames,
            regions = streamer.regions.len(),
            region_frames = streamer.region_frames,
            "streaming sample"
        );
        let loader = if config.spawn_loader {
            Some(loader::spawn(streamer.clone())?)
        } else {
            None
        };
        Ok(Self {
            info,
            storage: Storage::Streaming(streamer),
            loader,
        })
    }

    /// Open a sound file by path.
    ///
    /// `.ogg` files need the `vorbis_src` feature; everything else is read as WAV.
    pub fn open<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Self> {
        let path = path.as_ref();
        #[cfg(feature = "vorbis_src")]
        if path.extension().map_or(false, |e| e.eq_ignore_ascii_case("ogg")) {
            return Self::new(crate::source::VorbisFile::new(path)?, config);
        }
        Self::new(WavFile::new(path)?, config)
    }

    /// A silent resident cache, ready to be recorded into.
    pub fn empty(channels: usize, sample_rate: u32, frames: u64, format: SampleFormat) -> Result<Self> {
        let channels = channels.max(1);
        let len = frames as usize * format.frame_bytes(channels);
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory(len))?;
        bytes.resize(len, 0);
        if format.encoding == Encoding::U8 {
            bytes.fill(128);
        }
        Ok(Self {
            info: SourceInfo {
                channels,
                sample_rate,
                format,
                frames: Some(frames),
            },
            storage: Storage::Resident(RwLock::new(bytes)),
            loader: None,
        })
    }

    /// A resident `f32` cache holding interleaved `samples`.
    pub fn from_samples(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let format = SampleFormat::new(Encoding::F32, Endian::Little);
        let mut bytes = vec![0u8; samples.len() * format.byte_depth()];
        format.encode_slice(samples, &mut bytes);
        Self {
            info: SourceInfo {
                channels,
                sample_rate,
                format,
                frames: Some((samples.len() / channels) as u64),
            },
            storage: Storage::Resident(RwLock::new(bytes)),
            loader: None,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.info.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    /// Native layout of the cached data.
    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.info.format
    }

    /// Total frames available.
    pub fn num_frames(&self) -> u64 {
        match &self.storage {
            Storage::Resident(bytes) => (bytes.read().len() / self.info.frame_bytes()) as u64,
            Storage::Streaming(s) => s.frames,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.num_frames() as f64 / self.info.sample_rate.max(1) as f64)
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.storage, Storage::Resident(_))
    }

    /// Number of streaming regions (zero for resident caches).
    pub fn region_count(&self) -> usize {
        match &self.storage {
            Storage::Resident(_) => 0,
            Storage::Streaming(s) => s.regions.len(),
        }
    }

    /// Frames per streaming region (zero for resident caches).
    pub fn region_frames(&self) -> u64 {
        match &self.storage {
            Storage::Resident(_) => 0,
            Storage::Streaming(s) => s.region_frames,
        }
    }

    /// Regions currently held in memory (zero for resident caches).
    pub fn loaded_regions(&self) -> usize {
        match &self.storage {
            Storage::Resident(_) => 0,
            Storage::Streaming(s) => s.loaded_regions(),
        }
    }

    /// Whether streaming region `r` is in memory.
    pub fn is_region_loaded(&self, r: usize) -> bool {
        match &self.storage {
            Storage::Resident(_) => false,
            Storage::Streaming(s) => s.regions.get(r).map_or(false, |region| region.is_loaded()),
        }
    }

    /// Run one loader pass on the calling thread: load at most one queued
    /// region, age every loaded region by `elapsed`, evict the stale ones.
    ///
    /// Meant for caches built with [`CacheConfig::without_loader`]. Returns
    /// whether a queued region was taken. Resident caches do nothing.
    pub fn service(&self, elapsed: Duration) -> bool {
        match &self.storage {
            Storage::Resident(_) => false,
            Storage::Streaming(s) => s.pass(elapsed, None),
        }
    }

    /// Visit the frames `[start, start + count)` that exist.
    fn visit(&self, start: u64, count: u64, mut f: impl FnMut(u64, &[u8])) -> u64 {
        match &self.storage {
            Storage::Resident(bytes) => {
                let bytes = bytes.read();
                let frame_bytes = self.info.frame_bytes();
                let frames = (bytes.len() / frame_bytes) as u64;
                if start >= frames {
                    return 0;
                }
                let end = start.saturating_add(count).min(frames);
                let from = start as usize * frame_bytes;
                let to = end as usize * frame_bytes;
                for (i, chunk) in bytes[from..to].chunks_exact(frame_bytes).enumerate() {
                    f(i as u64, chunk);
                }
                end - start
            }
            Storage::Streaming(s) => s.visit(start, count, f),
        }
    }

    /// Read one frame into `out` (one sample per channel). Out of range is a no-op.
    pub fn get_frame(&self, frame: u64, out: &mut [f32]) {
        let format = self.info.format;
        self.visit(frame, 1, |_, bytes| {
            format.decode_slice(bytes, out);
        });
    }

    /// Read consecutive frames starting at `start` into per-channel buffers.
    ///
    /// Reads as many frames as the shortest buffer holds. Frames past the end
    /// leave their slots unchanged. Returns the number of frames written.
    pub fn get_frames<O: AsMut<[f32]>>(&self, start: u64, out: &mut [O]) -> u64 {
        let count = out.iter_mut().map(|o| o.as_mut().len()).min().unwrap_or(0) as u64;
        let format = self.info.format;
        let depth = format.byte_depth();
        self.visit(start, count, |i, bytes| {
            for (channel, sample) in out.iter_mut().zip(bytes.chunks_exact(depth)) {
                channel.as_mut()[i as usize] = format.decode(sample);
            }
        })
    }

    /// Gather the frames `base..base + N` into a zero-padded scratch block.
    fn neighbourhood<const N: usize>(&self, base: i64) -> [[f32; MAX_INTERP_CHANNELS]; N] {
        let mut block = [[0.0f32; MAX_INTERP_CHANNELS]; N];
        let format = self.info.format;
        let skip = (-base).max(0) as usize;
        if skip >= N {
            return block;
        }
        let first = (base + skip as i64) as u64;
        self.visit(first, (N - skip) as u64, |i, bytes| {
            format.decode_slice(bytes, &mut block[skip + i as usize]);
        });
        block
    }

    /// Linearly interpolated frame at fractional position `frame`.
    ///
    /// The frame after the last one reads as silence. Positions outside
    /// `[0, num_frames)` are a no-op. At most [`MAX_INTERP_CHANNELS`] channels.
    pub fn get_frame_linear(&self, frame: f64, out: &mut [f32]) {
        if frame < 0.0 || frame >= self.num_frames() as f64 {
            return;
        }
        let base = frame.floor();
        let t = (frame - base) as f32;
        let [a, b] = self.neighbourhood::<2>(base as i64);
        for (ch, o) in out.iter_mut().enumerate().take(self.channels().min(MAX_INTERP_CHANNELS)) {
            *o = a[ch] + t * (b[ch] - a[ch]);
        }
    }

    /// Four-point cubic interpolated frame at fractional position `frame`.
    ///
    /// Same range rules as [`get_frame_linear`](Self::get_frame_linear).
    pub fn get_frame_cubic(&self, frame: f64, out: &mut [f32]) {
        if frame < 0.0 || frame >= self.num_frames() as f64 {
            return;
        }
        let base = frame.floor();
        let t = (frame - base) as f32;
        let [y0, y1, y2, y3] = self.neighbourhood::<4>(base as i64 - 1);
        for (ch, o) in out.iter_mut().enumerate().take(self.channels().min(MAX_INTERP_CHANNELS)) {
            let a0 = y3[ch] - y2[ch] - y0[ch] + y1[ch];
            let a1 = y0[ch] - y1[ch] - a0;
            let a2 = y2[ch] - y0[ch];
            let a3 = y1[ch];
            *o = ((a0 * t + a1) * t + a2) * t + a3;
        }
    }

    fn resident(&self) -> Result<&RwLock<Vec<u8>>> {
        match &self.storage {
            Storage::Resident(bytes) => Ok(bytes),
            Storage::Streaming(_) => Err(Error::ReadOnly),
        }
    }

    /// Write one frame at `frame`. Out of range is a no-op.
    pub fn put_frame(&self, frame: u64, samples: &[f32]) -> Result<()> {
        let mut bytes = self.resident()?.write();
        let frame_bytes = self.info.frame_bytes();
        let from = frame as usize * frame_bytes;
        if let Some(dst) = bytes.get_mut(from..from + frame_bytes) {
            self.info.format.encode_slice(samples, dst);
        }
        Ok(())
    }

    /// Write per-channel buffers starting at `start`, converting to the native format.
    ///
    /// Frames past the end are dropped. Returns the number of frames written.
    pub fn put_frames<I: AsRef<[f32]>>(&self, start: u64, samples: &[I]) -> Result<u64> {
        self.put_frames_from(start, samples, 0)
    }

    /// [`put_frames`](Self::put_frames) taking each channel from `offset` onwards.
    pub fn put_frames_from<I: AsRef<[f32]>>(&self, start: u64, samples: &[I], offset: usize) -> Result<u64> {
        let mut bytes = self.resident()?.write();
        let format = self.info.format;
        let depth = format.byte_depth();
        let frame_bytes = self.info.frame_bytes();
        let frames = (bytes.len() / frame_bytes) as u64;
        if start >= frames {
            return Ok(0);
        }
        let count = samples
            .iter()
            .map(|s| s.as_ref().len().saturating_sub(offset))
            .min()
            .unwrap_or(0) as u64;
        let end = start.saturating_add(count).min(frames);
        let from = start as usize * frame_bytes;
        let to = end as usize * frame_bytes;
        for (i, frame) in bytes[from..to].chunks_exact_mut(frame_bytes).enumerate() {
            for (channel, dst) in samples.iter().zip(frame.chunks_exact_mut(depth)) {
                format.encode(channel.as_ref()[offset + i], dst);
            }
        }
        Ok(end - start)
    }

    /// Silence the whole buffer.
    pub fn clear(&self) -> Result<()> {
        let mut bytes = self.resident()?.write();
        let silence = if self.info.format.encoding == Encoding::U8 { 128 } else { 0 };
        bytes.fill(silence);
        Ok(())
    }

    /// Grow or shrink a resident buffer to `frames`, padding with silence.
    pub fn resize(&self, frames: u64) -> Result<()> {
        let mut bytes = self.resident()?.write();
        let len = frames as usize * self.info.frame_bytes();
        if len > bytes.len() {
            let extra = len - bytes.len();
            bytes.try_reserve_exact(extra).map_err(|_| Error::OutOfMemory(len))?;
        }
        let silence = if self.info.format.encoding == Encoding::U8 { 128 } else { 0 };
        bytes.resize(len, silence);
        Ok(())
    }

    /// Write a resident cache to a WAV file in its native encoding.
    pub fn write_wav<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.resident()?.read();
        let format = self.info.format;
        let (bits, sample_format) = match format.encoding {
            Encoding::U8 => (8, hound::SampleFormat::Int),
            Encoding::I16 => (16, hound::SampleFormat::Int),
            Encoding::I24 => (24, hound::SampleFormat::Int),
            Encoding::I32 => (32, hound::SampleFormat::Int),
            Encoding::F32 => (32, hound::SampleFormat::Float),
        };
        let spec = hound::WavSpec {
            channels: self.info.channels as u16,
            sample_rate: self.info.sample_rate,
            bits_per_sample: bits,
            sample_format,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for chunk in bytes.chunks_exact(format.byte_depth()) {
            let value = format.decode(chunk);
            match format.encoding {
                Encoding::F32 => writer.write_sample(value)?,
                _ => {
                    let scale = (1i64 << (bits - 1)) as f32;
                    let max = scale - 1.0;
                    writer.write_sample((value * scale).clamp(-scale, max) as i32)?
                }
            }
        }
        writer.finalize()?;
        Ok(())
    }
}

impl Drop for SampleCache {
    fn drop(&mut self) {
        if let Storage::Streaming(streamer) = &self.storage {
            streamer
                .shutdown
                .store(true, std::sync::atomic::Ordering::Release);
        }
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

/// Read a source to the end into one buffer.
fn read_all(source: &mut dyn AudioSource, info: &SourceInfo) -> Result<Vec<u8>> {
    const CHUNK_FRAMES: usize = 16_384;
    let frame_bytes = info.frame_bytes();
    let mut bytes = Vec::new();

    if let Some(frames) = info.frames {
        let len = frames as usize * frame_bytes;
        bytes.try_reserve_exact(len).map_err(|_| Error::OutOfMemory(len))?;
        bytes.resize(len, 0);
        let read = source.read_full(&mut bytes)?;
        bytes.truncate(read - read % frame_bytes);
        return Ok(bytes);
    }

    let chunk = CHUNK_FRAMES * frame_bytes;
    loop {
        let filled = bytes.len();
        bytes
            .try_reserve(chunk)
            .map_err(|_| Error::OutOfMemory(filled + chunk))?;
        bytes.resize(filled + chunk, 0);
        let read = source.read_full(&mut bytes[filled..])?;
        bytes.truncate(filled + read);
        if read < chunk {
            break;
        }
    }
    bytes.truncate(bytes.len() - bytes.len() % frame_bytes);
    Ok(bytes)
}
