use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schall::source::{MemorySource, RawFile};
use schall::{AudioSource, CacheConfig, Context, Encoding, Endian, Error, LoadOrder, SampleCache, SampleFormat, SourceInfo};

const RATE: u32 = 1000;

/// A stereo test signal with distinct channels.
fn signal(frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let t = i as f32 / frames as f32;
            [(t * 40.0).sin() * 0.8, t - 0.5]
        })
        .collect()
}

fn write_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn read_range(cache: &SampleCache, start: u64, len: usize) -> Vec<Vec<f32>> {
    let mut out = vec![vec![f32::NAN; len]; cache.channels()];
    let n = cache.get_frames(start, &mut out);
    assert_eq!(n, len as u64, "short read at {}", start);
    out
}

#[test]
fn resident_put_get_round_trip() {
    let frames = 500;
    let cache = SampleCache::empty(2, RATE, frames, SampleFormat::I16_LE).unwrap();
    assert!(cache.is_resident());

    let samples = signal(frames as usize);
    let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
    let right: Vec<f32> = samples.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(cache.put_frames(0, &[&left, &right]).unwrap(), frames);

    let back = read_range(&cache, 0, frames as usize);
    for (orig, read) in left.iter().chain(&right).zip(back[0].iter().chain(&back[1])) {
        assert!((orig - read).abs() <= 1.0 / 32768.0, "{} vs {}", orig, read);
    }
}

#[test]
fn put_frame_converts_to_big_endian_storage() {
    let format = SampleFormat::new(Encoding::I24, Endian::Big);
    let cache = SampleCache::empty(1, RATE, 4, format).unwrap();
    cache.put_frame(2, &[0.5]).unwrap();

    let mut out = [0.0];
    cache.get_frame(2, &mut out);
    assert!((out[0] - 0.5).abs() < 1e-6);
    cache.get_frame(1, &mut out);
    assert_eq!(out[0], 0.0);
}

#[test]
fn out_of_range_reads_leave_output_alone() {
    let cache = SampleCache::from_samples(&[0.1, 0.2, 0.3, 0.4], 2, RATE);
    let mut frame = [7.0, 7.0];
    cache.get_frame(2, &mut frame);
    assert_eq!(frame, [7.0, 7.0]);

    cache.get_frame_linear(-0.5, &mut frame);
    cache.get_frame_cubic(2.0, &mut frame);
    assert_eq!(frame, [7.0, 7.0]);

    // a partial range stops at the end
    let mut out = vec![vec![9.0; 4]; 2];
    assert_eq!(cache.get_frames(1, &mut out), 1);
    assert_eq!(out[0], vec![0.3, 9.0, 9.0, 9.0]);
    assert_eq!(out[1], vec![0.4, 9.0, 9.0, 9.0]);
}

#[test]
fn interpolated_reads() {
    let cache = SampleCache::from_samples(&[0.0, 1.0, 2.0, 3.0], 1, RATE);
    let mut out = [0.0];

    cache.get_frame_linear(1.25, &mut out);
    assert!((out[0] - 1.25).abs() < 1e-6);

    // a straight line stays straight under cubic interpolation away from the edges
    cache.get_frame_cubic(1.5, &mut out);
    assert!((out[0] - 1.5).abs() < 1e-6);

    // one past the end reads as silence
    cache.get_frame_linear(3.5, &mut out);
    assert!((out[0] - 1.5).abs() < 1e-6);
}

#[test]
fn streaming_matches_resident() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signal.wav");
    let frames = 4321;
    write_wav(&path, &signal(frames));

    let resident = SampleCache::open(&path, CacheConfig::resident()).unwrap();
    let streaming = SampleCache::open(&path, CacheConfig::streaming().without_loader()).unwrap();
    let threaded = SampleCache::open(
        &path,
        CacheConfig::streaming()
            .with_load_order(LoadOrder::Ordered)
            .with_lock_timeout(Duration::from_secs(1)),
    )
    .unwrap();

    assert!(resident.is_resident());
    assert!(!streaming.is_resident());
    assert_eq!(resident.num_frames(), frames as u64);
    assert_eq!(streaming.num_frames(), frames as u64);
    assert_eq!(streaming.region_frames(), 100);
    assert_eq!(streaming.region_count(), 44);

    for &(start, len) in &[(0, 10), (95, 10), (1234, 777), (4300, 21), (3999, 1)] {
        let expected = read_range(&resident, start, len);
        assert_eq!(read_range(&streaming, start, len), expected, "range {}+{}", start, len);
        assert_eq!(read_range(&threaded, start, len), expected, "range {}+{}", start, len);
    }

    let mut a = [0.0; 2];
    let mut b = [0.0; 2];
    resident.get_frame_cubic(2050.3, &mut a);
    streaming.get_frame_cubic(2050.3, &mut b);
    assert_eq!(a, b);
}

#[test]
fn stale_regions_are_evicted() {
    let source = MemorySource::from_samples(&signal(1000), 2, RATE, SampleFormat::I16_LE);
    let config = CacheConfig::streaming()
        .without_loader()
        .with_window(0, 0)
        .with_eviction_age(Duration::from_millis(30));
    let cache = SampleCache::new(source, config).unwrap();

    let mut frame = [0.0; 2];
    cache.get_frame(150, &mut frame);
    assert!(cache.is_region_loaded(1));
    assert_eq!(cache.loaded_regions(), 1);

    cache.service(Duration::from_millis(20));
    assert!(cache.is_region_loaded(1));

    // touching resets the age
    cache.get_frame(160, &mut frame);
    cache.service(Duration::from_millis(20));
    assert!(cache.is_region_loaded(1));

    cache.service(Duration::from_millis(20));
    assert!(!cache.is_region_loaded(1));
    assert_eq!(cache.loaded_regions(), 0);

    // and a later read loads it again
    cache.get_frame(150, &mut frame);
    assert!(cache.is_region_loaded(1));
}

#[test]
fn background_loader_fills_the_window() {
    let source = MemorySource::from_samples(&signal(2000), 2, RATE, SampleFormat::I16_LE);
    let config = CacheConfig::streaming()
        .with_window(1, 3)
        .with_lock_timeout(Duration::from_secs(1));
    let cache = SampleCache::new(source, config).unwrap();

    let mut frame = [0.0; 2];
    cache.get_frame(1050, &mut frame);

    let mut waited = Duration::ZERO;
    while cache.loaded_regions() < 5 && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }
    for r in 9..=13 {
        assert!(cache.is_region_loaded(r), "region {} not loaded", r);
    }
    assert!(!cache.is_region_loaded(14));
    assert!(!cache.is_region_loaded(8));
}

#[test]
fn streaming_caches_are_read_only() {
    let source = MemorySource::from_samples(&signal(300), 2, RATE, SampleFormat::I16_LE);
    let cache = SampleCache::new(source, CacheConfig::streaming().without_loader()).unwrap();
    assert!(matches!(cache.put_frames(0, &[[0.0f32; 1], [0.0; 1]]), Err(Error::ReadOnly)));
    assert!(matches!(cache.clear(), Err(Error::ReadOnly)));
    assert!(matches!(cache.resize(10), Err(Error::ReadOnly)));
}

#[test]
fn auto_mode_streams_long_sources() {
    let short = MemorySource::from_samples(&signal(500), 2, RATE, SampleFormat::I16_LE);
    let long = MemorySource::from_samples(&signal(3000), 2, RATE, SampleFormat::I16_LE);
    let config = CacheConfig::default()
        .without_loader()
        .with_resident_threshold(Duration::from_secs(1));

    assert!(SampleCache::new(short, config).unwrap().is_resident());
    assert!(!SampleCache::new(long, config).unwrap().is_resident());
}

/// Reports `info` in place of what the wrapped source actually holds.
struct Relabelled(MemorySource, SourceInfo);

impl AudioSource for Relabelled {
    fn info(&self) -> &SourceInfo {
        &self.1
    }

    fn read(&mut self, buf: &mut [u8]) -> schall::Result<usize> {
        self.0.read(buf)
    }

    fn seek(&mut self, frame: u64) -> schall::Result<()> {
        self.0.seek(frame)
    }
}

#[test]
fn unknown_length_is_decoded_resident() {
    let inner = MemorySource::from_samples(&signal(40_000), 2, RATE, SampleFormat::I16_LE);
    let info = SourceInfo {
        frames: None,
        ..*inner.info()
    };
    let cache = SampleCache::new(Relabelled(inner, info), CacheConfig::streaming()).unwrap();
    assert!(cache.is_resident());
    assert_eq!(cache.num_frames(), 40_000);
}

#[test]
fn resize_clear_and_write_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");

    let cache = SampleCache::empty(2, RATE, 2, SampleFormat::I16_LE).unwrap();
    cache.resize(4).unwrap();
    assert_eq!(cache.num_frames(), 4);
    cache.put_frames(0, &[vec![0.5, -0.5, 0.25, 0.0], vec![0.0, 0.1, 0.2, 0.3]]).unwrap();
    cache.write_wav(&path).unwrap();

    let reopened = SampleCache::open(&path, CacheConfig::resident()).unwrap();
    assert_eq!(reopened.num_frames(), 4);
    assert_eq!(reopened.format(), SampleFormat::I16_LE);
    assert_eq!(read_range(&reopened, 0, 4), read_range(&cache, 0, 4));

    cache.clear().unwrap();
    assert_eq!(read_range(&cache, 0, 4), vec![vec![0.0; 4]; 2]);
}

#[test]
fn context_shares_open_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.wav");
    write_wav(&path, &signal(100));

    let mut context = Context::new().with_cache_config(CacheConfig::resident());
    let a = context.sample(&path).unwrap();
    let b = context.sample(&path).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    drop(a);
    drop(b);
    let c = context.sample(&path).unwrap();
    assert_eq!(c.num_frames(), 100);
    assert_eq!(context.sample_count(), 1);
}

#[test]
fn source_shorter_than_reported_is_not_served() {
    let inner = MemorySource::from_samples(&signal(200), 2, RATE, SampleFormat::I16_LE);
    let info = SourceInfo {
        frames: Some(400),
        ..*inner.info()
    };
    let config = CacheConfig::streaming().without_loader().with_window(0, 0);
    let cache = SampleCache::new(Relabelled(inner, info), config).unwrap();
    assert_eq!(cache.region_count(), 4);

    let mut frame = [7.0, 7.0];
    cache.get_frame(150, &mut frame);
    assert_ne!(frame, [7.0, 7.0]);

    for _ in 0..2 {
        let mut frame = [7.0, 7.0];
        cache.get_frame(350, &mut frame);
        assert_eq!(frame, [7.0, 7.0]);
        assert!(!cache.is_region_loaded(3));
    }
    assert_eq!(cache.loaded_regions(), 1);
}

/// Fails seeks or reads at or past a movable frame, the way a file on a
/// flaky disk does.
struct Flaky {
    inner: MemorySource,
    frame: u64,
    broken_seeks: Arc<AtomicU64>,
    broken_reads: Arc<AtomicU64>,
}

impl Flaky {
    fn new(frames: usize) -> (Self, Arc<AtomicU64>, Arc<AtomicU64>) {
        let seeks = Arc::new(AtomicU64::new(u64::MAX));
        let reads = Arc::new(AtomicU64::new(u64::MAX));
        let source = Flaky {
            inner: MemorySource::from_samples(&signal(frames), 2, RATE, SampleFormat::I16_LE),
            frame: 0,
            broken_seeks: seeks.clone(),
            broken_reads: reads.clone(),
        };
        (source, seeks, reads)
    }
}

fn unplugged() -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "unplugged"))
}

impl AudioSource for Flaky {
    fn info(&self) -> &SourceInfo {
        self.inner.info()
    }

    fn read(&mut self, buf: &mut [u8]) -> schall::Result<usize> {
        if self.frame >= self.broken_reads.load(Ordering::SeqCst) {
            return Err(unplugged());
        }
        self.inner.read(buf)
    }

    fn seek(&mut self, frame: u64) -> schall::Result<()> {
        if frame >= self.broken_seeks.load(Ordering::SeqCst) {
            return Err(unplugged());
        }
        self.frame = frame;
        self.inner.seek(frame)
    }
}

#[test]
fn failed_inline_load_leaves_output_and_retries() {
    let (source, _, reads) = Flaky::new(1000);
    let config = CacheConfig::streaming().without_loader().with_window(0, 0);
    let cache = SampleCache::new(source, config).unwrap();

    reads.store(0, Ordering::SeqCst);
    let mut frame = [7.0, 7.0];
    cache.get_frame(150, &mut frame);
    assert_eq!(frame, [7.0, 7.0]);
    assert!(!cache.is_region_loaded(1));
    assert_eq!(cache.loaded_regions(), 0);

    // a range read stops at the first region it cannot load
    let mut out = vec![vec![7.0; 4]; 2];
    assert_eq!(cache.get_frames(98, &mut out), 0);
    assert_eq!(out, vec![vec![7.0; 4]; 2]);

    reads.store(u64::MAX, Ordering::SeqCst);
    cache.get_frame(150, &mut frame);
    assert_ne!(frame, [7.0, 7.0]);
    assert!(cache.is_region_loaded(1));
}

#[test]
fn failed_queued_load_is_queued_again_by_the_next_read() {
    let (source, seeks, _) = Flaky::new(1000);
    let config = CacheConfig::streaming().without_loader().with_window(0, 1);
    let cache = SampleCache::new(source, config).unwrap();

    let mut frame = [0.0; 2];
    cache.get_frame(150, &mut frame);
    assert!(cache.is_region_loaded(1));

    seeks.store(200, Ordering::SeqCst);
    assert!(cache.service(Duration::ZERO));
    assert!(!cache.is_region_loaded(2));

    seeks.store(u64::MAX, Ordering::SeqCst);
    assert!(!cache.service(Duration::ZERO));
    assert!(!cache.is_region_loaded(2));

    cache.get_frame(150, &mut frame);
    assert!(cache.service(Duration::ZERO));
    assert!(cache.is_region_loaded(2));
}

#[test]
fn loader_keeps_running_after_failed_loads() {
    let (source, seeks, _) = Flaky::new(1000);
    let config = CacheConfig::streaming()
        .with_window(0, 2)
        .with_lock_timeout(Duration::from_secs(1));
    let cache = SampleCache::new(source, config).unwrap();

    seeks.store(200, Ordering::SeqCst);
    let mut frame = [0.0; 2];
    cache.get_frame(150, &mut frame);
    assert!(cache.is_region_loaded(1));

    std::thread::sleep(Duration::from_millis(100));
    assert!(!cache.is_region_loaded(2));
    assert!(!cache.is_region_loaded(3));

    seeks.store(u64::MAX, Ordering::SeqCst);
    cache.get_frame(150, &mut frame);

    let mut waited = Duration::ZERO;
    while cache.loaded_regions() < 3 && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }
    assert!(cache.is_region_loaded(2));
    assert!(cache.is_region_loaded(3));
}

#[test]
fn raw_file_skips_its_header() {
    let frames = 50;
    let samples = signal(frames);
    let expected = SampleCache::new(
        MemorySource::from_samples(&samples, 2, RATE, SampleFormat::I16_LE),
        CacheConfig::resident(),
    )
    .unwrap();

    let mut data = vec![0u8; samples.len() * 2];
    SampleFormat::I16_LE.encode_slice(&samples, &mut data);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.raw");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"RAWHDR").unwrap();
    file.write_all(&data).unwrap();
    drop(file);

    let info = SourceInfo {
        channels: 2,
        sample_rate: RATE,
        format: SampleFormat::I16_LE,
        frames: None,
    };

    // length taken from the file size, minus the header
    let raw = RawFile::new(&path, info, 6).unwrap();
    assert_eq!(raw.info().frames, Some(frames as u64));
    let resident = SampleCache::new(raw, CacheConfig::resident()).unwrap();
    assert_eq!(read_range(&resident, 0, frames), read_range(&expected, 0, frames));

    let streaming = SampleCache::new(
        RawFile::new(&path, info, 6).unwrap(),
        CacheConfig::streaming()
            .without_loader()
            .with_region_duration(Duration::from_millis(10)),
    )
    .unwrap();
    assert_eq!(streaming.region_count(), 5);
    assert_eq!(read_range(&streaming, 13, 30), read_range(&expected, 13, 30));

    // an explicit length wins over the file size
    let short = RawFile::new(&path, SourceInfo { frames: Some(20), ..info }, 6).unwrap();
    let short = SampleCache::new(short, CacheConfig::resident()).unwrap();
    assert_eq!(short.num_frames(), 20);
    assert_eq!(read_range(&short, 0, 20), read_range(&expected, 0, 20));
}
