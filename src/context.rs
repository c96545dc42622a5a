//! Shared resources for node constructors.
//!
//! A [`Context`] deduplicates sample caches by name and lookup tables by
//! algorithm name. Whoever builds the graph owns it and passes it to the
//! constructors that need shared data; nothing here is global.

use std::path::Path;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use tracing::debug;

use crate::cache::{CacheConfig, SampleCache};
use crate::error::Result;

/// Registry of shared samples and tables.
#[derive(Default)]
pub struct Context {
    samples: HashMap<String, Weak<SampleCache>>,
    tables: HashMap<&'static str, Arc<[f32]>>,
    cache_config: CacheConfig,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration used for samples opened through [`sample`](Self::sample).
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }

    /// Open the sound file at `path`, or share the cache already open for it.
    ///
    /// The context only holds a weak reference: once every user of a sample
    /// drops it, the next call opens the file again.
    pub fn sample<P: AsRef<Path>>(&mut self, path: P) -> Result<Arc<SampleCache>> {
        let path = path.as_ref();
        let name = path.to_string_lossy();
        if let Some(cache) = self.get_sample(&name) {
            return Ok(cache);
        }
        let cache = Arc::new(SampleCache::open(path, self.cache_config)?);
        debug!(name = %name, resident = cache.is_resident(), "opened shared sample");
        self.samples.insert(name.into_owned(), Arc::downgrade(&cache));
        Ok(cache)
    }

    /// A live sample registered under `name`.
    pub fn get_sample(&self, name: &str) -> Option<Arc<SampleCache>> {
        self.samples.get(name).and_then(Weak::upgrade)
    }

    /// Register a cache built elsewhere (a recording buffer, a generated sample).
    pub fn insert_sample<S: Into<String>>(&mut self, name: S, cache: SampleCache) -> Arc<SampleCache> {
        let cache = Arc::new(cache);
        self.samples.insert(name.into(), Arc::downgrade(&cache));
        cache
    }

    /// Forget samples nobody holds any more. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.samples.len();
        self.samples.retain(|_, weak| weak.strong_count() > 0);
        before - self.samples.len()
    }

    /// Number of registered sample names, live or not.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// The table named `name`, building it with `f(index)` on first use.
    ///
    /// Later calls return the first table whatever `len` they ask for.
    pub fn table<F: FnMut(usize) -> f32>(&mut self, name: &'static str, len: usize, f: F) -> Arc<[f32]> {
        self.tables
            .entry(name)
            .or_insert_with(|| (0..len).map(f).collect())
            .clone()
    }
}
