//! Region streaming: the state shared between readers and the loader.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use itertools::Either;
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use crate::cache::config::{CacheConfig, LoadOrder};
use crate::error::{Error, Result};
use crate::source::{AudioSource, SourceInfo};

const UNLOADED: u8 = 0;
const QUEUED: u8 = 1;
const LOADED: u8 = 2;

/// One independently loadable slice of the source.
#[derive(Default)]
pub(crate) struct Region {
    pub(crate) data: Mutex<Option<Box<[u8]>>>,
    state: AtomicU8,
    /// Microseconds since the region was last read or loaded.
    age_us: AtomicU64,
}

impl Region {
    pub(crate) fn is_loaded(&self) -> bool {
        self.state.load(Ordering::Acquire) == LOADED
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.state.load(Ordering::Acquire) == QUEUED
    }
}

/// Regions of `[lo, hi]` in the order they should be queued around `center`.
///
/// `Nearest` goes one ahead, one behind, two ahead, two behind... and carries
/// on with whichever side is left once the shorter one runs out.
pub(crate) fn window_order(
    order: LoadOrder,
    center: usize,
    lo: usize,
    hi: usize,
) -> impl Iterator<Item = usize> {
    match order {
        LoadOrder::Ordered => Either::Left(lo..=hi),
        LoadOrder::Nearest => Either::Right(
            core::iter::once(center).chain(itertools::interleave(center + 1..=hi, (lo..center).rev())),
        ),
    }
}

pub(crate) struct Streamer {
    pub(crate) info: SourceInfo,
    pub(crate) frames: u64,
    pub(crate) region_frames: u64,
    pub(crate) regions: Box<[Region]>,
    source: Mutex<Box<dyn AudioSource>>,
    queue_tx: Sender<usize>,
    queue_rx: Receiver<usize>,
    config: CacheConfig,
    loaded: AtomicUsize,
    /// Set once an allocation fails; the cache stops serving reads.
    failed: AtomicBool,
    pub(crate) shutdown: AtomicBool,
}

impl Streamer {
    pub(crate) fn new(source: Box<dyn AudioSource>, frames: u64, config: CacheConfig) -> Self {
        let info = *source.info();
        let region_frames = ((config.region_duration.as_secs_f64() * info.sample_rate as f64) as u64).max(1);
        let count = frames.div_ceil(region_frames) as usize;
        let regions = (0..count).map(|_| Region::default()).collect();
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        Self {
            info,
            frames,
            region_frames,
            regions,
            source: Mutex::new(source),
            queue_tx,
            queue_rx,
            config,
            loaded: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub(crate) fn loaded_regions(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// Visit the frames `[start, start + count)` that exist, region by region.
    ///
    /// `f` gets the offset of the frame from `start` and its interleaved bytes.
    /// Stops early, leaving the remaining frames unvisited, if a region cannot
    /// be locked or loaded in time.
    pub(crate) fn visit(&self, start: u64, count: u64, mut f: impl FnMut(u64, &[u8])) -> u64 {
        if self.failed.load(Ordering::Acquire) {
            return 0;
        }
        let end = start.saturating_add(count).min(self.frames);
        let frame_bytes = self.info.frame_bytes();
        let mut frame = start;

        while frame < end {
            let r = (frame / self.region_frames) as usize;
            let region_start = r as u64 * self.region_frames;
            let stop = (region_start + self.region_frames).min(end);
            let served = self.with_region(r, |bytes| {
                let from = (frame - region_start) as usize * frame_bytes;
                let to = (stop - region_start) as usize * frame_bytes;
                for (i, chunk) in bytes[from..to].chunks_exact(frame_bytes).enumerate() {
                    f(frame - start + i as u64, chunk);
                }
            });
            if !served {
                break;
            }
            frame = stop;
        }
        frame.saturating_sub(start)
    }

    /// Lock region `r`, loading it inline if needed, and hand its bytes to `f`.
    fn with_region(&self, r: usize, f: impl FnOnce(&[u8])) -> bool {
        let region = &self.regions[r];
        let Some(mut guard) = region.data.try_lock_for(self.config.lock_timeout) else {
            warn!(region = r, "timed out waiting for region lock");
            return false;
        };

        if guard.is_none() {
            match self.load(r) {
                Ok(bytes) => {
                    *guard = Some(bytes);
                    self.mark_loaded(region);
                }
                Err(e) => {
                    region.state.store(UNLOADED, Ordering::Release);
                    warn!(region = r, error = %e, "inline region load failed");
                    return false;
                }
            }
        }

        self.schedule(r);
        region.age_us.store(0, Ordering::Release);

        match guard.as_deref() {
            Some(bytes) => {
                f(bytes);
                true
            }
            None => false,
        }
    }

    /// Queue the lookahead/lookback window around `r` for background loading.
    fn schedule(&self, r: usize) {
        let Some(last) = self.regions.len().checked_sub(1) else {
            return;
        };
        let lo = r.saturating_sub(self.config.lookback);
        let hi = (r + self.config.lookahead).min(last);
        for idx in window_order(self.config.load_order, r, lo, hi) {
            if idx == r {
                continue;
            }
            let queued = self.regions[idx]
                .state
                .compare_exchange(UNLOADED, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if queued {
                trace!(region = idx, "queued region");
                let _ = self.queue_tx.send(idx);
            }
        }
    }

    fn mark_loaded(&self, region: &Region) {
        region.age_us.store(0, Ordering::Release);
        if region.state.swap(LOADED, Ordering::AcqRel) != LOADED {
            self.loaded.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Read region `r` from the source.
    fn load(&self, r: usize) -> Result<Box<[u8]>> {
        let first = r as u64 * self.region_frames;
        let frames = self.region_frames.min(self.frames - first);
        let len = frames as usize * self.info.frame_bytes();

        let mut buf = Vec::new();
        if buf.try_reserve_exact(len).is_err() {
            self.failed.store(true, Ordering::Release);
            error!(region = r, bytes = len, "region allocation failed, cache disabled");
            return Err(Error::OutOfMemory(len));
        }
        buf.resize(len, 0);

        let Some(mut source) = self.source.try_lock_for(self.config.lock_timeout) else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "source busy",
            )));
        };
        source.seek(first)?;
        let read = source.read_full(&mut buf)?;
        if read < len {
            // leave the region unloaded so the next access retries
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("region {} ended after {} of {} bytes", r, read, len),
            )));
        }
        trace!(region = r, frames, "loaded region");
        Ok(buf.into_boxed_slice())
    }

    /// One loader iteration: load at most one queued region, then age and evict.
    ///
    /// Waits up to `wait` for queued work when given, otherwise only polls.
    /// Returns whether a queue entry was taken.
    pub(crate) fn pass(&self, elapsed: Duration, wait: Option<Duration>) -> bool {
        let next = match wait {
            Some(timeout) => self.queue_rx.recv_timeout(timeout).ok(),
            None => self.queue_rx.try_recv().ok(),
        };
        if let Some(r) = next {
            self.load_queued(r);
        }
        self.age_and_evict(elapsed);
        next.is_some()
    }

    fn load_queued(&self, r: usize) {
        let region = &self.regions[r];
        let Some(mut guard) = region.data.try_lock() else {
            // a reader holds it and will load it inline if needed
            let _ = region
                .state
                .compare_exchange(QUEUED, UNLOADED, Ordering::AcqRel, Ordering::Acquire);
            return;
        };
        if guard.is_some() {
            return;
        }
        match self.load(r) {
            Ok(bytes) => {
                *guard = Some(bytes);
                self.mark_loaded(region);
            }
            Err(e) => {
                region.state.store(UNLOADED, Ordering::Release);
                warn!(region = r, error = %e, "background region load failed");
            }
        }
    }

    fn age_and_evict(&self, elapsed: Duration) {
        let dt = elapsed.as_micros() as u64;
        let limit = self.config.eviction_age.as_micros() as u64;

        for (r, region) in self.regions.iter().enumerate() {
            if !region.is_loaded() {
                continue;
            }
            let age = region.age_us.fetch_add(dt, Ordering::AcqRel) + dt;
            if age <= limit {
                continue;
            }
            let Some(mut guard) = region.data.try_lock() else {
                continue;
            };
            // re-check: a reader may have touched it before we got the lock
            if region.age_us.load(Ordering::Acquire) <= limit || guard.is_none() {
                continue;
            }
            *guard = None;
            region.state.store(UNLOADED, Ordering::Release);
            region.age_us.store(0, Ordering::Release);
            self.loaded.fetch_sub(1, Ordering::AcqRel);
            trace!(region = r, "evicted region");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_window_is_ascending() {
        let order: Vec<_> = window_order(LoadOrder::Ordered, 5, 4, 7).collect();
        assert_eq!(order, vec![4, 5, 6, 7]);
    }

    #[test]
    fn nearest_window_alternates_ahead_first() {
        let order: Vec<_> = window_order(LoadOrder::Nearest, 5, 3, 7).collect();
        assert_eq!(order, vec![5, 6, 4, 7, 3]);
    }

    #[test]
    fn nearest_window_continues_on_longer_side() {
        let order: Vec<_> = window_order(LoadOrder::Nearest, 5, 4, 8).collect();
        assert_eq!(order, vec![5, 6, 4, 7, 8]);

        let order: Vec<_> = window_order(LoadOrder::Nearest, 1, 0, 1).collect();
        assert_eq!(order, vec![1, 0]);
    }
}
