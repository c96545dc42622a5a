//! Stream a sound file from disk to the default output device.
//!
//! Run with: cargo run --example stream_file --features cpal_sink -- song.wav

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use schall::nodes::{Interpolation, SamplePlayer};
use schall::{CacheConfig, CpalDevice, Driver, Graph, SampleCache};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let path = std::env::args().nth(1).ok_or("usage: stream_file <path>")?;

    let device = CpalDevice::default_output().ok_or("No audio device")?;
    println!("Output: {} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());

    let cache = Arc::new(SampleCache::open(&path, CacheConfig::streaming())?);
    println!(
        "Streaming {:.1}s in {} regions",
        cache.duration().as_secs_f64(),
        cache.region_count()
    );

    let mut graph = Graph::new(device.sample_rate(), 256);
    let player = graph.add(
        SamplePlayer::new(cache.clone())
            .with_channels(device.channels() as usize)
            .with_interpolation(Interpolation::Cubic)
            .kill_on_end(),
    );

    let output = device.open(Duration::from_millis(50))?;
    let running = Driver::new(graph, player, Box::new(output)).start()?;

    println!("Playing... Ctrl+C to stop");
    let length = cache.duration() + Duration::from_millis(250);
    let mut played = Duration::ZERO;
    while running.is_running() && played < length {
        sleep(Duration::from_millis(250));
        played += Duration::from_millis(250);
    }
    if let Some(driver) = running.stop() {
        println!("{:?}", driver.stats());
    }
    Ok(())
}
