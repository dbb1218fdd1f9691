//! Overdub mixing.
//!
//! Produces a new loop buffer from an existing loop and a freshly captured
//! layer. Neither input is modified.

use loopstack_core::{CHANNELS, Frames, Result, SampleBuffer};

use crate::config::MixSettings;

/// Mix `overdub` onto `base`, both starting at loop frame 0.
///
/// The result has the length of `base`. A shorter overdub repeats to fill it.
pub fn mix(
    base: &SampleBuffer,
    overdub: &SampleBuffer,
    settings: &MixSettings,
) -> Result<SampleBuffer> {
    mix_aligned(base, overdub, 0, settings)
}

/// Mix `overdub` onto `base`, where the overdub's first frame was heard
/// against loop frame `offset`.
///
/// Every output frame is `clamp(base * base_weight + overdub * overdub_weight)`.
pub fn mix_aligned(
    base: &SampleBuffer,
    overdub: &SampleBuffer,
    offset: Frames,
    settings: &MixSettings,
) -> Result<SampleBuffer> {
    let len = base.len();
    let overdub_len = overdub.len();
    let offset = offset % len;
    let limit = settings.clamp_limit;

    let mut channels: [Vec<f32>; CHANNELS] = [Vec::with_capacity(len), Vec::with_capacity(len)];
    for (ch, out) in channels.iter_mut().enumerate() {
        let base_ch = base.channel(ch);
        let overdub_ch = overdub.channel(ch);
        out.extend(base_ch.iter().enumerate().map(|(i, &b)| {
            let j = ((i + len - offset) % len) % overdub_len;
            (b * settings.base_weight + overdub_ch[j] * settings.overdub_weight)
                .clamp(-limit, limit)
        }));
    }

    let [left, right] = channels;
    SampleBuffer::from_channels(left, right, base.sample_rate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn buffer(samples: &[f32]) -> SampleBuffer {
        SampleBuffer::from_mono(samples.to_vec(), 48000).unwrap()
    }

    #[test]
    fn test_short_overdub_wraps() {
        let mixed = mix(&buffer(&[0.5; 4]), &buffer(&[0.4; 2]), &MixSettings::default()).unwrap();
        assert_eq!(mixed.len(), 4);
        for &s in mixed.channel(0).iter().chain(mixed.channel(1)) {
            assert_relative_eq!(s, 0.69, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_result_is_clamped() {
        let mixed = mix(
            &buffer(&[1.0, -1.0]),
            &buffer(&[1.0, -1.0]),
            &MixSettings::default(),
        )
        .unwrap();
        assert_relative_eq!(mixed.channel(0)[0], 0.95);
        assert_relative_eq!(mixed.channel(0)[1], -0.95);
    }

    #[test]
    fn test_longer_overdub_is_truncated() {
        let settings = MixSettings {
            base_weight: 1.0,
            overdub_weight: 1.0,
            clamp_limit: 1.0,
        };
        let mixed = mix(&buffer(&[0.0; 2]), &buffer(&[0.1, 0.2, 0.3]), &settings).unwrap();
        assert_eq!(mixed.channel(0), &[0.1, 0.2]);
    }

    #[test]
    fn test_aligned_to_offset() {
        let settings = MixSettings {
            base_weight: 0.0,
            overdub_weight: 1.0,
            clamp_limit: 1.0,
        };
        let base = buffer(&[0.0; 4]);
        let overdub = buffer(&[0.1, 0.2, 0.3, 0.4]);

        let mixed = mix_aligned(&base, &overdub, 1, &settings).unwrap();
        assert_eq!(mixed.channel(0), &[0.4, 0.1, 0.2, 0.3]);

        // Offsets wrap around the loop
        let wrapped = mix_aligned(&base, &overdub, 5, &settings).unwrap();
        assert_eq!(wrapped.channel(0), mixed.channel(0));
    }

    #[test]
    fn test_inputs_untouched() {
        let base = buffer(&[0.5; 4]);
        let overdub = buffer(&[0.4; 2]);
        let _ = mix(&base, &overdub, &MixSettings::default()).unwrap();
        assert_eq!(base.channel(0), &[0.5; 4]);
        assert_eq!(overdub.channel(1), &[0.4; 2]);
    }

    #[test]
    fn test_stereo_channels_independent() {
        let base = SampleBuffer::from_channels(vec![0.5; 2], vec![-0.5; 2], 48000).unwrap();
        let overdub = SampleBuffer::from_channels(vec![0.0; 2], vec![0.5; 2], 48000).unwrap();
        let mixed = mix(&base, &overdub, &MixSettings::default()).unwrap();
        assert_relative_eq!(mixed.channel(0)[0], 0.45, epsilon = 1e-6);
        assert_relative_eq!(mixed.channel(1)[0], -0.15, epsilon = 1e-6);
    }
}
