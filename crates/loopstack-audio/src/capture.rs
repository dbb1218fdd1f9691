//! Capture pipeline, control-thread side.
//!
//! The audio thread copies the tap signal of every armed callback into the
//! capture queue, followed by a [`CaptureBlock`] header naming the window it
//! belongs to. This side drains the queue into an [`Accumulator`] and turns
//! the result into a loop buffer when the window closes. Blocks from a window
//! other than the current one are read and thrown away, so audio that was in
//! flight when a window closed never leaks into the next take.

use loopstack_comms::{AudioCommand, CaptureBlock, CaptureLayout, CaptureReceiver, rtrb};
use loopstack_core::{Frames, Sample, SampleBuffer, SampleRate};

/// Capture arena grows by this many frames at a time
const CHUNK_SECONDS: usize = 1;

/// Growable capture storage made of fixed-size chunks.
///
/// Appending never moves already captured audio; a chunk is only allocated
/// when the previous one is full.
#[derive(Debug)]
pub struct Accumulator {
    layout: CaptureLayout,
    chunk_samples: usize,
    chunks: Vec<Vec<Sample>>,
    frames: Frames,
    limit: Option<Frames>,
    loop_offset: Option<u64>,
}

impl Accumulator {
    /// `limit` caps the number of frames kept; later frames are discarded.
    pub fn new(layout: CaptureLayout, chunk_frames: Frames, limit: Option<Frames>) -> Self {
        let spf = layout.samples_per_frame();
        let chunk_frames = chunk_frames.max(1);
        // A bounded take that fits in one chunk is allocated exactly once
        let first = limit.map_or(chunk_frames, |l| l.clamp(1, chunk_frames));
        Self {
            layout,
            chunk_samples: chunk_frames * spf,
            chunks: vec![Vec::with_capacity(first * spf)],
            frames: 0,
            limit,
            loop_offset: None,
        }
    }

    pub fn frames(&self) -> Frames {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Whether the frame limit has been reached
    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.frames >= limit)
    }

    /// Loop playhead at the first captured frame, if a loop was playing.
    pub fn loop_offset(&self) -> Option<u64> {
        self.loop_offset
    }

    /// Record the playhead of the first block. Later calls are ignored.
    pub fn mark_loop_offset(&mut self, position: Option<u64>) {
        if self.frames == 0 && self.loop_offset.is_none() {
            self.loop_offset = position;
        }
    }

    /// Append samples in this accumulator's layout. Returns frames kept.
    pub fn append(&mut self, samples: &[Sample]) -> Frames {
        let spf = self.layout.samples_per_frame();
        let mut frames = samples.len() / spf;
        if let Some(limit) = self.limit {
            frames = frames.min(limit.saturating_sub(self.frames));
        }

        let mut remaining = &samples[..frames * spf];
        while !remaining.is_empty() {
            let needs_chunk = self
                .chunks
                .last()
                .is_none_or(|chunk| chunk.len() >= self.chunk_samples);
            if needs_chunk {
                self.chunks.push(Vec::with_capacity(self.chunk_samples));
            }
            let Some(chunk) = self.chunks.last_mut() else {
                break;
            };
            let room = self.chunk_samples - chunk.len();
            let n = room.min(remaining.len());
            chunk.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
        }

        self.frames += frames;
        frames
    }

    /// Assemble the captured audio into a buffer; `None` if nothing was captured.
    pub fn finish(self, sample_rate: SampleRate) -> Option<CapturedTake> {
        if self.frames == 0 {
            return None;
        }
        let samples = self.chunks.iter().flatten().copied();
        let buffer = match self.layout {
            CaptureLayout::Mono => SampleBuffer::from_mono(samples.collect(), sample_rate),
            CaptureLayout::Stereo => {
                let mut left = Vec::with_capacity(self.frames);
                let mut right = Vec::with_capacity(self.frames);
                let mut samples = samples;
                while let (Some(l), Some(r)) = (samples.next(), samples.next()) {
                    left.push(l);
                    right.push(r);
                }
                SampleBuffer::from_channels(left, right, sample_rate)
            }
        };

        match buffer {
            Ok(buffer) => Some(CapturedTake {
                buffer,
                loop_offset: self.loop_offset,
            }),
            Err(e) => {
                tracing::error!("Failed to assemble captured audio: {}", e);
                None
            }
        }
    }
}

/// Audio captured during one window
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedTake {
    pub buffer: SampleBuffer,
    /// Loop playhead at the take's first frame
    pub loop_offset: Option<u64>,
}

#[derive(Debug)]
struct Window {
    id: u32,
    accumulator: Accumulator,
}

/// Owns the receiving end of the capture queue and the open window, if any.
pub struct CapturePipeline {
    receiver: CaptureReceiver,
    layout: CaptureLayout,
    sample_rate: SampleRate,
    next_window: u32,
    window: Option<Window>,
}

impl CapturePipeline {
    pub fn new(receiver: CaptureReceiver, layout: CaptureLayout, sample_rate: SampleRate) -> Self {
        Self {
            receiver,
            layout,
            sample_rate,
            next_window: 1,
            window: None,
        }
    }

    /// Layout for a live input with `channels` channels
    pub fn layout_for(channels: usize) -> CaptureLayout {
        if channels == 1 {
            CaptureLayout::Mono
        } else {
            CaptureLayout::Stereo
        }
    }

    /// Swap in the capture queue of a new audio stream.
    ///
    /// Any open window is discarded; callers close it first if they want it.
    pub fn reconnect(&mut self, receiver: CaptureReceiver, layout: CaptureLayout) {
        self.receiver = receiver;
        self.layout = layout;
        self.window = None;
    }

    pub fn is_armed(&self) -> bool {
        self.window.is_some()
    }

    /// Frames captured in the open window
    pub fn captured_frames(&self) -> Frames {
        self.window.as_ref().map_or(0, |w| w.accumulator.frames())
    }

    /// Whether the open window reached its frame limit
    pub fn is_full(&self) -> bool {
        self.window.as_ref().is_some_and(|w| w.accumulator.is_full())
    }

    /// Open a new window and tell the audio thread to start capturing.
    ///
    /// Returns false if the command queue is full; no window is opened then.
    pub fn arm(
        &mut self,
        commands: &mut rtrb::Producer<AudioCommand>,
        limit: Option<Frames>,
    ) -> bool {
        // Anything still queued belongs to an earlier window
        self.drain();

        let id = self.next_window;
        let chunk_frames = self.sample_rate as usize * CHUNK_SECONDS;
        self.window = Some(Window {
            id,
            accumulator: Accumulator::new(self.layout, chunk_frames, limit),
        });

        let command = AudioCommand::Arm {
            window: id,
            layout: self.layout,
        };
        if commands.push(command).is_err() {
            tracing::warn!("Command queue full, cannot arm capture");
            self.window = None;
            return false;
        }

        self.next_window = self.next_window.wrapping_add(1).max(1);
        tracing::debug!("Armed capture window {} (limit {:?})", id, limit);
        true
    }

    /// Move queued blocks into the open window. Returns frames kept.
    pub fn drain(&mut self) -> Frames {
        let mut kept = 0;
        while let Ok(block) = self.receiver.blocks.pop() {
            kept += self.take_block(block);
        }
        kept
    }

    fn take_block(&mut self, block: CaptureBlock) -> Frames {
        let wanted = block.samples();
        let Ok(chunk) = self.receiver.samples.read_chunk(wanted) else {
            // Headers are pushed after their samples, so this means the
            // queues are out of step; drop what is there to resync.
            let available = self.receiver.samples.slots();
            if let Ok(chunk) = self.receiver.samples.read_chunk(available) {
                chunk.commit_all();
            }
            tracing::warn!("Capture queue out of sync, dropped {} samples", available);
            return 0;
        };

        let kept = match self.window.as_mut() {
            Some(window)
                if window.id == block.window && block.layout == window.accumulator.layout =>
            {
                let accumulator = &mut window.accumulator;
                accumulator.mark_loop_offset(block.loop_position);
                let (first, second) = chunk.as_slices();
                accumulator.append(first) + accumulator.append(second)
            }
            _ => 0,
        };
        chunk.commit_all();
        kept
    }

    /// Close the window and assemble its audio.
    ///
    /// Queues a `Disarm`, then collects whatever the audio thread delivered so
    /// far. Blocks still in flight are discarded by the next drain.
    pub fn disarm(&mut self, commands: &mut rtrb::Producer<AudioCommand>) -> Option<CapturedTake> {
        self.drain();
        let window = self.window.take()?;
        if commands.push(AudioCommand::Disarm).is_err() {
            tracing::warn!("Command queue full, capture stays armed until the next window");
        }
        tracing::debug!(
            "Closed capture window {} with {} frames",
            window.id,
            window.accumulator.frames()
        );
        window.accumulator.finish(self.sample_rate)
    }

    /// Close the window and throw its audio away.
    pub fn abort(&mut self, commands: &mut rtrb::Producer<AudioCommand>) {
        if let Some(window) = self.window.take() {
            if commands.push(AudioCommand::Disarm).is_err() {
                tracing::warn!("Command queue full, capture stays armed until the next window");
            }
            tracing::debug!("Discarded capture window {}", window.id);
        }
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopstack_comms::{ChannelCapacities, create_channels};

    #[test]
    fn test_accumulator_grows_by_chunks() {
        let mut acc = Accumulator::new(CaptureLayout::Stereo, 4, None);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();

        assert_eq!(acc.append(&samples[..6]), 3);
        assert_eq!(acc.append(&samples[6..]), 7);
        assert_eq!(acc.frames(), 10);
        assert_eq!(acc.chunks.len(), 3);

        let take = acc.finish(48000).unwrap();
        assert_eq!(take.buffer.len(), 10);
        assert_eq!(take.buffer.frame(0), [0.0, 1.0]);
        assert_eq!(take.buffer.frame(9), [18.0, 19.0]);
    }

    #[test]
    fn test_mono_take_is_duplicated() {
        let mut acc = Accumulator::new(CaptureLayout::Mono, 16, None);
        acc.append(&[0.1, 0.2, 0.3]);
        let take = acc.finish(48000).unwrap();
        assert_eq!(take.buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(take.buffer.channel(1), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_limit_discards_excess() {
        let mut acc = Accumulator::new(CaptureLayout::Mono, 16, Some(4));
        assert_eq!(acc.append(&[0.5; 3]), 3);
        assert!(!acc.is_full());
        assert_eq!(acc.append(&[0.5; 3]), 1);
        assert!(acc.is_full());
        assert_eq!(acc.append(&[0.5; 3]), 0);
        assert_eq!(acc.finish(48000).unwrap().buffer.len(), 4);
    }

    #[test]
    fn test_empty_accumulator_yields_nothing() {
        let acc = Accumulator::new(CaptureLayout::Stereo, 16, None);
        assert!(acc.is_empty());
        assert!(acc.finish(48000).is_none());
    }

    #[test]
    fn test_loop_offset_from_first_block() {
        let mut acc = Accumulator::new(CaptureLayout::Mono, 16, None);
        acc.mark_loop_offset(Some(7));
        acc.append(&[0.1]);
        acc.mark_loop_offset(Some(9));
        assert_eq!(acc.loop_offset(), Some(7));
    }

    fn push_block(
        audio: &mut loopstack_comms::AudioChannels<()>,
        window: u32,
        samples: &[f32],
        layout: CaptureLayout,
    ) {
        for &s in samples {
            audio.capture.samples.push(s).unwrap();
        }
        audio
            .capture
            .blocks
            .push(CaptureBlock {
                window,
                frames: (samples.len() / layout.samples_per_frame()) as u32,
                layout,
                loop_position: None,
            })
            .unwrap();
    }

    #[test]
    fn test_pipeline_ignores_stale_windows() {
        let (control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        let mut commands = control.command_tx;
        let mut pipeline = CapturePipeline::new(control.capture, CaptureLayout::Stereo, 48000);

        assert!(pipeline.arm(&mut commands, None));
        assert!(matches!(
            audio.command_rx.pop(),
            Ok(AudioCommand::Arm { window: 1, .. })
        ));

        push_block(&mut audio, 99, &[0.9; 8], CaptureLayout::Stereo);
        push_block(&mut audio, 1, &[0.1, 0.2, 0.3, 0.4], CaptureLayout::Stereo);

        assert_eq!(pipeline.drain(), 2);
        assert_eq!(pipeline.captured_frames(), 2);

        let take = pipeline.disarm(&mut commands).unwrap();
        assert_eq!(take.buffer.channel(0), &[0.1, 0.3]);
        assert_eq!(take.buffer.channel(1), &[0.2, 0.4]);
        assert!(matches!(audio.command_rx.pop(), Ok(AudioCommand::Disarm)));
        assert!(!pipeline.is_armed());
    }

    #[test]
    fn test_late_blocks_do_not_leak_into_next_window() {
        let (control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        let mut commands = control.command_tx;
        let mut pipeline = CapturePipeline::new(control.capture, CaptureLayout::Mono, 48000);

        assert!(pipeline.arm(&mut commands, None));
        pipeline.abort(&mut commands);

        // Audio thread had not seen the disarm yet
        push_block(&mut audio, 1, &[0.5; 4], CaptureLayout::Mono);

        assert!(pipeline.arm(&mut commands, None));
        push_block(&mut audio, 2, &[0.25; 2], CaptureLayout::Mono);

        let take = pipeline.disarm(&mut commands).unwrap();
        assert_eq!(take.buffer.channel(0), &[0.25, 0.25]);
    }

    #[test]
    fn test_disarm_without_audio_is_empty() {
        let (control, _audio) = create_channels::<()>(ChannelCapacities::default());
        let mut commands = control.command_tx;
        let mut pipeline = CapturePipeline::new(control.capture, CaptureLayout::Stereo, 48000);

        assert!(pipeline.disarm(&mut commands).is_none());
        assert!(pipeline.arm(&mut commands, Some(10)));
        assert!(pipeline.disarm(&mut commands).is_none());
    }

    #[test]
    fn test_arm_fails_when_queue_full() {
        let capacities = ChannelCapacities {
            commands: 1,
            ..ChannelCapacities::default()
        };
        let (control, _audio) = create_channels::<()>(capacities);
        let mut commands = control.command_tx;
        let mut pipeline = CapturePipeline::new(control.capture, CaptureLayout::Stereo, 48000);

        assert!(pipeline.arm(&mut commands, None));
        assert!(!pipeline.arm(&mut commands, None));
        assert!(!pipeline.is_armed());
    }
}
