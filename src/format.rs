//! Native sample formats and conversion to and from `f32`.
//!
//! Sample caches keep decoded audio in the source's native byte layout and
//! convert on read; the driver converts graph output to the device's layout
//! before writing. Both go through [`SampleFormat`].

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use dasp_sample::{Sample, I24};

/// Integer or float encoding of a single sample.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Encoding {
    /// Unsigned 8-bit PCM, centred on 128.
    U8,
    /// Signed 16-bit PCM.
    I16,
    /// Signed 24-bit PCM, packed in three bytes.
    I24,
    /// Signed 32-bit PCM.
    I32,
    /// IEEE 754 single precision.
    F32,
}

impl Encoding {
    /// Bytes occupied by one sample.
    #[inline]
    pub fn byte_depth(self) -> usize {
        match self {
            Encoding::U8 => 1,
            Encoding::I16 => 2,
            Encoding::I24 => 3,
            Encoding::I32 | Encoding::F32 => 4,
        }
    }

    /// Largest value that survives encoding without wrapping.
    fn max_f32(self) -> f32 {
        match self {
            Encoding::U8 => 127.0 / 128.0,
            Encoding::I16 => i16::MAX as f32 / 32_768.0,
            Encoding::I24 => 8_388_607.0 / 8_388_608.0,
            Encoding::I32 => 1.0,
            Encoding::F32 => f32::MAX,
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Encoding plus byte order: everything needed to move between bytes and `f32`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SampleFormat {
    pub encoding: Encoding,
    pub endian: Endian,
}

impl SampleFormat {
    pub const I16_LE: SampleFormat = SampleFormat::new(Encoding::I16, Endian::Little);
    pub const I16_BE: SampleFormat = SampleFormat::new(Encoding::I16, Endian::Big);
    pub const F32_LE: SampleFormat = SampleFormat::new(Encoding::F32, Endian::Little);

    pub const fn new(encoding: Encoding, endian: Endian) -> Self {
        Self { encoding, endian }
    }

    /// Bytes occupied by one sample.
    #[inline]
    pub fn byte_depth(&self) -> usize {
        self.encoding.byte_depth()
    }

    /// Bytes occupied by one frame of `channels` samples.
    #[inline]
    pub fn frame_bytes(&self, channels: usize) -> usize {
        self.byte_depth() * channels
    }

    /// Decode one sample. `bytes` must hold at least [`byte_depth`](Self::byte_depth) bytes.
    #[inline]
    pub fn decode(&self, bytes: &[u8]) -> f32 {
        match self.endian {
            Endian::Little => decode_with::<LittleEndian>(self.encoding, bytes),
            Endian::Big => decode_with::<BigEndian>(self.encoding, bytes),
        }
    }

    /// Encode one sample. Integer encodings clamp to their representable
    /// range; `F32` stores the value as is.
    #[inline]
    pub fn encode(&self, value: f32, bytes: &mut [u8]) {
        let value = match self.encoding {
            Encoding::F32 => value,
            integer => value.clamp(-1.0, integer.max_f32()),
        };
        match self.endian {
            Endian::Little => encode_with::<LittleEndian>(self.encoding, value, bytes),
            Endian::Big => encode_with::<BigEndian>(self.encoding, value, bytes),
        }
    }

    /// Decode consecutive samples until either side runs out. Returns the count.
    pub fn decode_slice(&self, bytes: &[u8], out: &mut [f32]) -> usize {
        let mut n = 0;
        for (chunk, sample) in bytes.chunks_exact(self.byte_depth()).zip(out.iter_mut()) {
            *sample = self.decode(chunk);
            n += 1;
        }
        n
    }

    /// Encode consecutive samples until either side runs out. Returns the count.
    pub fn encode_slice(&self, samples: &[f32], bytes: &mut [u8]) -> usize {
        let mut n = 0;
        for (chunk, &sample) in bytes.chunks_exact_mut(self.byte_depth()).zip(samples.iter()) {
            self.encode(sample, chunk);
            n += 1;
        }
        n
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::I16_LE
    }
}

fn decode_with<B: ByteOrder>(encoding: Encoding, b: &[u8]) -> f32 {
    match encoding {
        Encoding::U8 => b[0].to_sample::<f32>(),
        Encoding::I16 => B::read_i16(b).to_sample::<f32>(),
        Encoding::I24 => I24::new_unchecked(B::read_i24(b)).to_sample::<f32>(),
        Encoding::I32 => B::read_i32(b).to_sample::<f32>(),
        Encoding::F32 => B::read_f32(b),
    }
}

fn encode_with<B: ByteOrder>(encoding: Encoding, v: f32, b: &mut [u8]) {
    match encoding {
        Encoding::U8 => b[0] = v.to_sample::<u8>(),
        Encoding::I16 => B::write_i16(b, v.to_sample::<i16>()),
        Encoding::I24 => B::write_i24(b, v.to_sample::<I24>().inner()),
        Encoding::I32 => B::write_i32(b, v.to_sample::<i32>()),
        Encoding::F32 => B::write_f32(b, v),
    }
}
