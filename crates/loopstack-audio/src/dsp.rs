//! Small DSP building blocks used by graph nodes.

use loopstack_core::{CHANNELS, Frames, Sample, SampleRate};

/// Stereo block of per-channel sample storage.
pub type StereoBuffer = [Vec<Sample>; CHANNELS];

/// Allocate a silent stereo block of `frames` frames.
pub fn stereo_buffer(frames: Frames) -> StereoBuffer {
    [vec![0.0; frames], vec![0.0; frames]]
}

/// Gain that approaches its target exponentially, one step per frame.
///
/// Matches a first-order smoother with the configured time constant, so a
/// change reaches ~63% of its distance after one time constant.
#[derive(Debug, Clone)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    coeff: f32,
}

impl SmoothedGain {
    /// Gain settled at `initial`; `smoothing_ms <= 0` makes changes instant.
    pub fn new(initial: f32, smoothing_ms: f32, sample_rate: SampleRate) -> Self {
        let coeff = if smoothing_ms <= 0.0 || sample_rate == 0 {
            1.0
        } else {
            let tau = smoothing_ms / 1000.0 * sample_rate as f32;
            1.0 - (-1.0 / tau).exp()
        };
        Self {
            current: initial,
            target: initial,
            coeff,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    fn is_settled(&self) -> bool {
        (self.target - self.current).abs() < 1e-6
    }

    /// Apply the gain to `frames` frames of `input` into `output`.
    pub fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, frames: Frames) {
        let [in_l, in_r] = input;
        let [out_l, out_r] = output;

        if self.is_settled() {
            self.current = self.target;
            let gain = self.current;
            for (o, i) in out_l[..frames].iter_mut().zip(&in_l[..frames]) {
                *o = i * gain;
            }
            for (o, i) in out_r[..frames].iter_mut().zip(&in_r[..frames]) {
                *o = i * gain;
            }
            return;
        }

        for f in 0..frames {
            self.current += (self.target - self.current) * self.coeff;
            out_l[f] = in_l[f] * self.current;
            out_r[f] = in_r[f] * self.current;
        }
    }
}

/// One-pole high-pass filter, independent state per channel.
#[derive(Debug, Clone)]
pub struct HighPass {
    alpha: f32,
    prev_input: [f32; CHANNELS],
    prev_output: [f32; CHANNELS],
}

impl HighPass {
    pub fn new(corner_hz: f32, sample_rate: SampleRate) -> Self {
        let rc = 1.0 / (2.0 * std::f32::consts::PI * corner_hz);
        let dt = 1.0 / sample_rate as f32;
        Self {
            alpha: rc / (rc + dt),
            prev_input: [0.0; CHANNELS],
            prev_output: [0.0; CHANNELS],
        }
    }

    pub fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, frames: Frames) {
        for ch in 0..CHANNELS {
            let mut x1 = self.prev_input[ch];
            let mut y1 = self.prev_output[ch];
            for (o, &x) in output[ch][..frames].iter_mut().zip(&input[ch][..frames]) {
                let y = self.alpha * (y1 + x - x1);
                *o = y;
                x1 = x;
                y1 = y;
            }
            self.prev_input[ch] = x1;
            self.prev_output[ch] = y1;
        }
    }
}
