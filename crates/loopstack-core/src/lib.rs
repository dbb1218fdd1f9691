//! Core types, traits, and constants shared across the loopstack crates.
//!
//! This crate provides fundamental building blocks that all other loopstack crates depend on.

pub mod buffer;

pub use buffer::SampleBuffer;

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Audio sample type
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Every loop, graph node and processing module in the engine is stereo.
pub const CHANNELS: ChannelCount = 2;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
    /// 48 kHz sample rate (professional audio standard)
    pub const SR_48000: SampleRate = 48000;
    /// 96 kHz sample rate (high resolution audio)
    pub const SR_96000: SampleRate = 96000;
}

/// Audio buffer block sizes
pub mod block_sizes {
    use super::Frames;

    /// 64 frames per block (very low latency, ~1.3ms @ 48kHz)
    pub const BLOCK_64: Frames = 64;
    /// 128 frames per block (low latency, ~2.7ms @ 48kHz)
    pub const BLOCK_128: Frames = 128;
    /// 256 frames per block (balanced, ~5.3ms @ 48kHz)
    pub const BLOCK_256: Frames = 256;
    /// 512 frames per block (higher latency, ~10.7ms @ 48kHz)
    pub const BLOCK_512: Frames = 512;
}

/// Convert a duration in milliseconds to a frame count at `sample_rate`.
pub fn ms_to_frames(ms: f32, sample_rate: SampleRate) -> Frames {
    (ms.max(0.0) * sample_rate as f32 / 1000.0).round() as Frames
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A buffer was built from channels of different lengths
    #[error("Channel length mismatch: left has {left} frames, right has {right}")]
    ChannelMismatch {
        /// Left channel length
        left: Frames,
        /// Right channel length
        right: Frames,
    },

    /// A buffer would have no frames
    #[error("Sample buffer must contain at least one frame")]
    EmptyBuffer,

    /// A sample rate of zero was supplied
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(SampleRate),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
