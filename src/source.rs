//! Decoded audio sources consumed by [`SampleCache`](crate::SampleCache).
//!
//! A source hands out raw interleaved bytes in its native [`SampleFormat`] and
//! can seek by frame. Container parsing is delegated to `hound` (WAV) and
//! `lewton` (Ogg/Vorbis, feature `vorbis_src`).

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{Encoding, Endian, SampleFormat};

/// Shape of the decoded data a source produces.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SourceInfo {
    pub channels: usize,
    pub sample_rate: u32,
    pub format: SampleFormat,
    /// Total frame count, or `None` until the whole stream has been decoded.
    pub frames: Option<u64>,
}

impl SourceInfo {
    /// Bytes per interleaved frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.channels)
    }

    /// Length in time, when the frame count is known.
    pub fn duration(&self) -> Option<Duration> {
        self.frames
            .map(|f| Duration::from_secs_f64(f as f64 / self.sample_rate.max(1) as f64))
    }
}

/// A readable, seekable stream of interleaved native-format frames.
pub trait AudioSource: Send {
    fn info(&self) -> &SourceInfo;

    /// Prepare for reading from the first frame.
    fn open(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Position the stream so the next read starts at `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Keep reading until `buf` is full or the stream ends. Returns bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

/// Interleaved bytes held in memory.
pub struct MemorySource {
    info: SourceInfo,
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    /// Wrap already-encoded bytes. The frame count is derived from the length.
    pub fn new(data: Vec<u8>, channels: usize, sample_rate: u32, format: SampleFormat) -> Self {
        let channels = channels.max(1);
        let frames = (data.len() / format.frame_bytes(channels)) as u64;
        Self {
            info: SourceInfo {
                channels,
                sample_rate,
                format,
                frames: Some(frames),
            },
            data,
            position: 0,
        }
    }

    /// Encode interleaved `f32` samples into `format`.
    pub fn from_samples(samples: &[f32], channels: usize, sample_rate: u32, format: SampleFormat) -> Self {
        let mut data = vec![0u8; samples.len() * format.byte_depth()];
        format.encode_slice(samples, &mut data);
        Self::new(data, channels, sample_rate, format)
    }
}

impl AudioSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.position.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.position = frame as usize * self.info.frame_bytes();
        Ok(())
    }
}

/// Headerless PCM on disk, optionally preceded by `data_offset` bytes of header.
pub struct RawFile {
    info: SourceInfo,
    file: BufReader<File>,
    data_offset: u64,
}

impl RawFile {
    /// Open a raw PCM file. When `info.frames` is `None` the length is taken from the file size.
    pub fn new<P: AsRef<Path>>(path: P, mut info: SourceInfo, data_offset: u64) -> Result<Self> {
        let file = File::open(path)?;
        if info.frames.is_none() {
            let len = file.metadata()?.len().saturating_sub(data_offset);
            info.frames = Some(len / info.frame_bytes() as u64);
        }
        Ok(Self {
            info,
            file: BufReader::new(file),
            data_offset,
        })
    }
}

impl AudioSource for RawFile {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let offset = self.data_offset + frame * self.info.frame_bytes() as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// A WAV file read through `hound`, re-packed as little-endian native bytes.
pub struct WavFile {
    info: SourceInfo,
    reader: hound::WavReader<BufReader<File>>,
    float: bool,
}

impl WavFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let float = spec.sample_format == hound::SampleFormat::Float;
        let encoding = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => Encoding::F32,
            (hound::SampleFormat::Int, 8) => Encoding::U8,
            (hound::SampleFormat::Int, 16) => Encoding::I16,
            (hound::SampleFormat::Int, 24) => Encoding::I24,
            (hound::SampleFormat::Int, 32) => Encoding::I32,
            (fmt, bits) => {
                return Err(Error::UnsupportedFormat(format!("{:?} at {} bits", fmt, bits)));
            }
        };
        let info = SourceInfo {
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            format: SampleFormat::new(encoding, Endian::Little),
            frames: Some(reader.duration() as u64),
        };
        debug!(?info, "opened wav source");
        Ok(Self { info, reader, float })
    }
}

impl AudioSource for WavFile {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let depth = self.info.format.byte_depth();
        let encoding = self.info.format.encoding;
        let mut written = 0;

        if self.float {
            for (chunk, sample) in buf.chunks_exact_mut(depth).zip(self.reader.samples::<f32>()) {
                LittleEndian::write_f32(chunk, sample?);
                written += depth;
            }
        } else {
            for (chunk, sample) in buf.chunks_exact_mut(depth).zip(self.reader.samples::<i32>()) {
                let s = sample?;
                match encoding {
                    Encoding::U8 => chunk[0] = (s + 128) as u8,
                    Encoding::I16 => LittleEndian::write_i16(chunk, s as i16),
                    Encoding::I24 => LittleEndian::write_i24(chunk, s),
                    _ => LittleEndian::write_i32(chunk, s),
                }
                written += depth;
            }
        }
        Ok(written)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let frame = u32::try_from(frame).map_err(|_| Error::Unseekable)?;
        self.reader.seek(frame)?;
        Ok(())
    }
}

/// An Ogg/Vorbis file decoded packet by packet. Length is unknown until fully read,
/// and only rewinding to the start is supported.
#[cfg(feature = "vorbis_src")]
pub struct VorbisFile {
    path: std::path::PathBuf,
    info: SourceInfo,
    reader: lewton::inside_ogg::OggStreamReader<File>,
    pending: Vec<u8>,
    pending_pos: usize,
}

#[cfg(feature = "vorbis_src")]
impl VorbisFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = lewton::inside_ogg::OggStreamReader::new(File::open(&path)?)?;
        let info = SourceInfo {
            channels: reader.ident_hdr.audio_channels as usize,
            sample_rate: reader.ident_hdr.audio_sample_rate,
            format: SampleFormat::I16_LE,
            frames: None,
        };
        Ok(Self {
            path,
            info,
            reader,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }
}

#[cfg(feature = "vorbis_src")]
impl AudioSource for VorbisFile {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.pending_pos >= self.pending.len() {
            match self.reader.read_dec_packet_itl()? {
                Some(packet) => {
                    self.pending.resize(packet.len() * 2, 0);
                    LittleEndian::write_i16_into(&packet, &mut self.pending);
                    self.pending_pos = 0;
                }
                None => return Ok(0),
            }
        }
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame != 0 {
            return Err(Error::Unseekable);
        }
        self.reader = lewton::inside_ogg::OggStreamReader::new(File::open(&self.path)?)?;
        self.pending.clear();
        self.pending_pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_seeks_by_frame() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32 / 16.0).collect();
        let mut src = MemorySource::from_samples(&samples, 2, 44_100, SampleFormat::I16_LE);
        assert_eq!(src.info().frames, Some(4));

        src.seek(2).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(src.read_full(&mut buf).unwrap(), 4);
        let fmt = SampleFormat::I16_LE;
        assert!((fmt.decode(&buf[..2]) - 4.0 / 16.0).abs() < 1e-4);

        src.seek(4).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }
}
