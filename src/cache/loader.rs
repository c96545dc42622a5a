//! Background loader thread for streaming caches.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::debug;

use crate::cache::stream::Streamer;
use crate::error::Result;

pub(crate) fn spawn(streamer: Arc<Streamer>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("schall-loader".into())
        .spawn(move || run(&streamer))?;
    Ok(handle)
}

fn run(streamer: &Streamer) {
    debug!(regions = streamer.regions.len(), "loader started");
    let idle = streamer.config().idle_sleep;
    let mut last = Instant::now();

    while !streamer.shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        let elapsed = now - last;
        last = now;
        // blocks for up to `idle` when the queue is empty
        streamer.pass(elapsed, Some(idle));
    }
    debug!("loader stopped");
}
