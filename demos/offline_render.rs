//! Render a few seconds of a clocked arpeggio to a WAV file, no audio device needed.
//!
//! Run with: cargo run --example offline_render -- out.wav

use schall::nodes::{Clock, Gain, Sine};
use schall::{Context, Driver, Graph, Message, NullDevice, OutputFormat, SampleCache, SampleFormat};

const RATE: u32 = 48_000;
const SECONDS: u64 = 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "render.wav".into());

    let mut context = Context::new();
    let mut graph = Graph::new(RATE, 480);

    let sine = graph.add(Sine::new(&mut context, 220.0).with_amplitude(0.5));
    let gain = graph.add(Gain::new(0.8).with_channels(1).with_smoothing_ms(5.0, RATE));
    graph.connect(sine, 0, gain, 0);

    // step through a minor arpeggio on every clock pulse
    let notes = [220.0, 261.63, 329.63, 440.0];
    let mailbox = graph.mailbox(sine);
    let clock = graph.add(Clock::new(250.0).with_listener(move |msg: &Message| {
        if let Message::Tick { count, .. } = *msg {
            mailbox.send(Message::Param("frequency", notes[count as usize % notes.len()]));
        }
    }));
    graph.add_dependent(gain, clock);

    let format = OutputFormat::new(RATE, 2, SampleFormat::I16_LE);
    let ticks = SECONDS * RATE as u64 / 480;
    let mut driver = Driver::new(graph, gain, Box::new(NullDevice::new(format)));

    let mut rendered = Vec::with_capacity((ticks * 480 * 2) as usize);
    driver.run_non_realtime(ticks, |frames| rendered.extend_from_slice(frames));

    let take = SampleCache::from_samples(&rendered, 2, RATE);
    take.write_wav(&path)?;
    println!("wrote {:.1}s to {}", take.duration().as_secs_f64(), path);
    Ok(())
}
