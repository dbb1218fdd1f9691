//! Immutable stereo sample buffers.
//!
//! A `SampleBuffer` is the unit every loop is stored as. It is never edited
//! in place: recording, overdubbing and undo all produce or swap whole
//! buffers, so a buffer handed to the playback voice can be read without
//! synchronization.

use std::time::Duration;

use crate::{CHANNELS, Error, Frames, Result, Sample, SampleRate};

/// Fixed-length, non-interleaved stereo audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: [Vec<Sample>; CHANNELS],
    sample_rate: SampleRate,
}

impl SampleBuffer {
    /// Build a buffer from separate left/right channels.
    pub fn from_channels(
        left: Vec<Sample>,
        right: Vec<Sample>,
        sample_rate: SampleRate,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if left.len() != right.len() {
            return Err(Error::ChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        if left.is_empty() {
            return Err(Error::EmptyBuffer);
        }

        Ok(Self {
            channels: [left, right],
            sample_rate,
        })
    }

    /// Build a buffer that carries the same mono signal on both channels.
    pub fn from_mono(samples: Vec<Sample>, sample_rate: SampleRate) -> Result<Self> {
        let right = samples.clone();
        Self::from_channels(samples, right, sample_rate)
    }

    /// Number of frames (samples per channel). Always > 0.
    pub fn len(&self) -> Frames {
        self.channels[0].len()
    }

    /// Buffers are never empty; present for API symmetry with slices.
    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Samples of one channel (`0` = left, `1` = right).
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Both channels at frame `index`.
    pub fn frame(&self, index: Frames) -> [Sample; CHANNELS] {
        [self.channels[0][index], self.channels[1][index]]
    }

    /// Playback duration of the buffer.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / f64::from(self.sample_rate))
    }

    /// Largest absolute sample value across both channels.
    pub fn peak(&self) -> Sample {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0_f32, |max, &s| max.max(s.abs()))
    }
}
