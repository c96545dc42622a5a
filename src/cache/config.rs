//! Sample cache configuration.

use std::time::Duration;

/// How a cache holds its decoded data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BufferingMode {
    /// Decode the whole source into one buffer up front.
    Resident,
    /// Page the source through fixed-length regions loaded on demand.
    Streaming,
    /// Resident below [`CacheConfig::resident_threshold`], streaming above it.
    #[default]
    Auto,
}

/// Order in which the lookahead/lookback window is queued for loading.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LoadOrder {
    /// Ascending region index across the whole window.
    Ordered,
    /// Outward from the requested region: one ahead, one behind, two ahead, ...
    #[default]
    Nearest,
}

/// Tuning for a [`SampleCache`](crate::SampleCache).
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub mode: BufferingMode,
    /// Length of one streaming region.
    pub region_duration: Duration,
    /// Regions after the one being read that are queued for loading.
    pub lookahead: usize,
    /// Regions before the one being read that are queued for loading.
    pub lookback: usize,
    /// Untouched regions older than this are evicted.
    pub eviction_age: Duration,
    pub load_order: LoadOrder,
    /// Longest a read waits for a region lock before giving up for this call.
    pub lock_timeout: Duration,
    /// How long the loader waits for work before running an idle pass.
    pub idle_sleep: Duration,
    /// Longest source [`BufferingMode::Auto`] keeps resident.
    pub resident_threshold: Duration,
    /// Start a loader thread for streaming caches. When off, the owner drives
    /// loading and eviction through [`SampleCache::service`](crate::SampleCache::service).
    pub spawn_loader: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: BufferingMode::Auto,
            region_duration: Duration::from_millis(100),
            lookahead: 2,
            lookback: 1,
            eviction_age: Duration::from_secs(5),
            load_order: LoadOrder::Nearest,
            lock_timeout: Duration::from_millis(2),
            idle_sleep: Duration::from_millis(10),
            resident_threshold: Duration::from_secs(10),
            spawn_loader: true,
        }
    }
}

impl CacheConfig {
    /// Whole-file buffering.
    pub fn resident() -> Self {
        Self {
            mode: BufferingMode::Resident,
            ..Self::default()
        }
    }

    /// Region streaming with default geometry.
    pub fn streaming() -> Self {
        Self {
            mode: BufferingMode::Streaming,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: BufferingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_region_duration(mut self, duration: Duration) -> Self {
        self.region_duration = duration;
        self
    }

    /// Set the window queued around each read, in regions.
    pub fn with_window(mut self, lookback: usize, lookahead: usize) -> Self {
        self.lookback = lookback;
        self.lookahead = lookahead;
        self
    }

    pub fn with_eviction_age(mut self, age: Duration) -> Self {
        self.eviction_age = age;
        self
    }

    pub fn with_load_order(mut self, order: LoadOrder) -> Self {
        self.load_order = order;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_resident_threshold(mut self, threshold: Duration) -> Self {
        self.resident_threshold = threshold;
        self
    }

    /// Disable the loader thread; loading and eviction happen in [`SampleCache::service`](crate::SampleCache::service).
    pub fn without_loader(mut self) -> Self {
        self.spawn_loader = false;
        self
    }
}
