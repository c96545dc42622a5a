//! Error types for sample sources, caches and output devices.
//!
//! Graph wiring mistakes (an input or output channel that does not exist) are
//! not represented here: they are programming errors and panic at the call site.

#[cfg(feature = "vorbis_src")]
use lewton::VorbisError;

/// Errors raised outside the real-time path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Standard I/O error from a file-backed source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV container error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Ogg/Vorbis decode error.
    #[cfg(feature = "vorbis_src")]
    #[error("Vorbis decode error: {0:?}")]
    Vorbis(VorbisError),

    /// No usable output device, or the device went away.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The output stream could not be built or failed while running.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// A sample encoding the source or device cannot handle.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The source cannot seek to an arbitrary frame.
    #[error("Source does not support seeking")]
    Unseekable,

    /// The operation needs the total frame count, which the source does not report.
    #[error("Source length is unknown")]
    UnknownLength,

    /// Writes are only accepted by resident caches.
    #[error("Streaming caches are read-only")]
    ReadOnly,

    /// A region or sample buffer could not be allocated.
    #[error("Out of memory allocating {0} bytes")]
    OutOfMemory(usize),
}

#[cfg(feature = "vorbis_src")]
impl From<VorbisError> for Error {
    fn from(e: VorbisError) -> Self {
        Error::Vorbis(e)
    }
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
