//! Loop playback.
//!
//! [`PlaybackScheduler`] lives on the control thread and decides when a loop
//! starts; [`LoopVoice`] lives on the audio thread and reads the loop. There
//! is at most one sounding voice.

use std::sync::Arc;

use loopstack_comms::{AudioCommand, rtrb};
use loopstack_core::{Frames, SampleBuffer};

use crate::dsp::StereoBuffer;

/// Control-side playback scheduling
#[derive(Debug)]
pub struct PlaybackScheduler {
    start_offset: u64,
    active: Option<usize>,
}

impl PlaybackScheduler {
    /// `start_offset` frames separate a request from the loop's first frame.
    pub fn new(start_offset: u64) -> Self {
        Self {
            start_offset: start_offset.max(1),
            active: None,
        }
    }

    /// Track whose loop was last scheduled, while playback is active
    pub fn active_track(&self) -> Option<usize> {
        self.active
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Replace any sounding loop with `buffer`, starting slightly after `clock`.
    pub fn play(
        &mut self,
        track: usize,
        buffer: Arc<SampleBuffer>,
        clock: u64,
        commands: &mut rtrb::Producer<AudioCommand>,
    ) -> bool {
        self.stop(commands);

        let start_at = clock + self.start_offset;
        let command = AudioCommand::StartPlayback {
            track,
            buffer,
            start_at,
        };
        if commands.push(command).is_err() {
            tracing::warn!("Command queue full, playback of track {} not started", track);
            return false;
        }

        tracing::debug!("Scheduled track {} at frame {}", track, start_at);
        self.active = Some(track);
        true
    }

    /// Stop the sounding loop, if any.
    pub fn stop(&mut self, commands: &mut rtrb::Producer<AudioCommand>) -> bool {
        if self.active.take().is_none() {
            return false;
        }
        if commands.push(AudioCommand::StopPlayback).is_err() {
            tracing::warn!("Command queue full, playback not stopped");
            return false;
        }
        true
    }

    /// Forget the active voice without sending anything (new audio stream).
    pub fn reset(&mut self) {
        self.active = None;
    }
}

/// Audio-side looping reader
#[derive(Debug, Default)]
pub struct LoopVoice {
    track: usize,
    buffer: Option<Arc<SampleBuffer>>,
    start_at: u64,
    position: Frames,
}

impl LoopVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn track(&self) -> Option<usize> {
        self.buffer.as_ref().map(|_| self.track)
    }

    /// Start reading `buffer` at absolute frame `start_at`.
    ///
    /// Returns the buffer this voice was holding, which must not be dropped
    /// on the audio thread.
    #[must_use]
    pub fn start(
        &mut self,
        track: usize,
        buffer: Arc<SampleBuffer>,
        start_at: u64,
    ) -> Option<Arc<SampleBuffer>> {
        self.track = track;
        self.start_at = start_at;
        self.position = 0;
        self.buffer.replace(buffer)
    }

    /// Go silent. Returns the released buffer.
    #[must_use]
    pub fn stop(&mut self) -> Option<Arc<SampleBuffer>> {
        self.position = 0;
        self.buffer.take()
    }

    /// Loop frame that plays at absolute frame `clock`
    pub fn position(&self, clock: u64) -> Option<u64> {
        let buffer = self.buffer.as_ref()?;
        let len = buffer.len() as u64;
        if clock >= self.start_at {
            Some(self.position as u64)
        } else {
            let lead = (self.start_at - clock) % len;
            Some((len - lead) % len)
        }
    }

    /// Write `frames` frames starting at absolute frame `clock` into `out`.
    ///
    /// Frames before the start time are silent. A start time already in the
    /// past starts the loop immediately.
    pub fn render(&mut self, clock: u64, out: &mut StereoBuffer, frames: Frames) {
        let Some(buffer) = self.buffer.as_ref() else {
            for ch in out.iter_mut() {
                ch[..frames].fill(0.0);
            }
            return;
        };

        let lead = usize::try_from(self.start_at.saturating_sub(clock))
            .unwrap_or(usize::MAX)
            .min(frames);
        for ch in out.iter_mut() {
            ch[..lead].fill(0.0);
        }

        let len = buffer.len();
        let mut written = lead;
        while written < frames {
            let n = (len - self.position).min(frames - written);
            for (ch, dst) in out.iter_mut().enumerate() {
                dst[written..written + n]
                    .copy_from_slice(&buffer.channel(ch)[self.position..self.position + n]);
            }
            self.position = (self.position + n) % len;
            written += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::stereo_buffer;
    use loopstack_comms::{ChannelCapacities, create_channels};

    fn ramp(len: usize) -> Arc<SampleBuffer> {
        let samples: Vec<f32> = (1..=len).map(|i| i as f32).collect();
        Arc::new(SampleBuffer::from_mono(samples, 48000).unwrap())
    }

    #[test]
    fn test_voice_waits_for_start() {
        let mut voice = LoopVoice::new();
        assert!(voice.start(0, ramp(3), 2).is_none());

        let mut out = stereo_buffer(8);
        voice.render(0, &mut out, 8);
        assert_eq!(out[0], vec![0.0, 0.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
        assert_eq!(out[1], out[0]);
    }

    #[test]
    fn test_voice_continues_across_blocks() {
        let mut voice = LoopVoice::new();
        let _ = voice.start(0, ramp(3), 0);

        let mut out = stereo_buffer(2);
        voice.render(0, &mut out, 2);
        assert_eq!(out[0], vec![1.0, 2.0]);
        assert_eq!(voice.position(2), Some(2));

        voice.render(2, &mut out, 2);
        assert_eq!(out[0], vec![3.0, 1.0]);
    }

    #[test]
    fn test_late_start_plays_immediately() {
        let mut voice = LoopVoice::new();
        let _ = voice.start(0, ramp(4), 10);
        let mut out = stereo_buffer(2);
        voice.render(100, &mut out, 2);
        assert_eq!(out[0], vec![1.0, 2.0]);
    }

    #[test]
    fn test_position_before_start() {
        let mut voice = LoopVoice::new();
        assert_eq!(voice.position(0), None);

        let _ = voice.start(1, ramp(4), 10);
        assert_eq!(voice.position(10), Some(0));
        assert_eq!(voice.position(9), Some(3));
        assert_eq!(voice.position(6), Some(0));
        assert_eq!(voice.track(), Some(1));
    }

    #[test]
    fn test_start_returns_previous_buffer() {
        let mut voice = LoopVoice::new();
        let first = ramp(2);
        let _ = voice.start(0, Arc::clone(&first), 0);
        let released = voice.start(1, ramp(3), 0).unwrap();
        assert!(Arc::ptr_eq(&released, &first));

        assert!(voice.stop().is_some());
        assert!(!voice.is_active());

        let mut out = [vec![1.0; 2], vec![1.0; 2]];
        voice.render(0, &mut out, 2);
        assert_eq!(out[0], vec![0.0; 2]);
    }

    #[test]
    fn test_scheduler_offsets_start() {
        let (control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        let mut commands = control.command_tx;
        let mut scheduler = PlaybackScheduler::new(480);

        assert!(scheduler.play(0, ramp(4), 1000, &mut commands));
        match audio.command_rx.pop() {
            Ok(AudioCommand::StartPlayback { track, start_at, .. }) => {
                assert_eq!(track, 0);
                assert_eq!(start_at, 1480);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(scheduler.active_track(), Some(0));
    }

    #[test]
    fn test_scheduler_stops_before_replacing() {
        let (control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        let mut commands = control.command_tx;
        let mut scheduler = PlaybackScheduler::new(0);

        assert!(scheduler.play(0, ramp(4), 0, &mut commands));
        assert!(scheduler.play(1, ramp(4), 0, &mut commands));

        assert!(matches!(
            audio.command_rx.pop(),
            Ok(AudioCommand::StartPlayback {
                track: 0,
                start_at: 1,
                ..
            })
        ));
        assert!(matches!(
            audio.command_rx.pop(),
            Ok(AudioCommand::StopPlayback)
        ));
        assert!(matches!(
            audio.command_rx.pop(),
            Ok(AudioCommand::StartPlayback { track: 1, .. })
        ));

        assert!(scheduler.stop(&mut commands));
        assert!(!scheduler.stop(&mut commands));
        assert!(!scheduler.is_playing());
    }
}
