//! Lockless communication primitives for audio-thread-safe communication.
//!
//! This crate provides the channel set connecting the control thread (which
//! owns loops, state and graph construction) with the real-time audio thread
//! (which renders the graph and taps captured audio). Every channel is single
//! producer / single consumer; nothing here ever blocks the audio thread.

pub use crossbeam_channel;
pub use rtrb;
pub use triple_buffer;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use loopstack_core::{Frames, Sample, SampleBuffer, SampleRate};
use triple_buffer::TripleBuffer;

/// Named gain stages of the signal graph that can be retargeted live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainStage {
    /// Input trim at the head of the live path
    InputTrim,
    /// Live monitoring gate after the capture tap
    Monitor,
    /// Loop playback level before the master sum
    LoopMix,
    /// Master output volume
    Master,
}

/// How the audio thread writes captured blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureLayout {
    /// Left channel only; duplicated to both channels when finalized
    Mono,
    /// Interleaved left/right pairs
    Stereo,
}

impl CaptureLayout {
    /// Samples written per captured frame.
    pub const fn samples_per_frame(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Commands that can be sent from the control thread to the audio thread
///
/// IMPORTANT: All variants must be real-time safe (no heap allocation/deallocation).
/// Buffers travel as `Arc`s and are handed back through the retire queue instead
/// of being dropped on the audio thread. Graphs use the separate `graph_tx` channel.
#[derive(Debug, Clone)]
pub enum AudioCommand {
    /// Start tagging captured blocks with `window` from the next callback on
    Arm {
        /// Capture window id
        window: u32,
        /// Sample layout to write
        layout: CaptureLayout,
    },
    /// Stop capturing from the next callback on
    Disarm,
    /// Replace the playback voice with a looping read of `buffer`
    StartPlayback {
        /// Track the buffer belongs to
        track: usize,
        /// Loop contents
        buffer: Arc<SampleBuffer>,
        /// Absolute frame clock at which frame 0 of the loop sounds
        start_at: u64,
    },
    /// Silence the playback voice
    StopPlayback,
    /// Move a gain stage towards a new target (smoothed on the audio thread)
    SetGain {
        /// Which stage
        stage: GainStage,
        /// Target linear gain
        target: f32,
    },
    /// A freshly built graph is waiting on the graph channel
    InstallGraph,
}

/// Events sent from audio thread back to the control thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A graph from the graph channel is now rendering
    GraphInstalled,
    /// The playback voice picked up a new loop
    PlaybackStarted {
        /// Track the loop belongs to
        track: usize,
    },
    /// The playback voice went silent
    PlaybackStopped,
    /// Captured blocks were dropped because the capture queue was full
    CaptureOverflow {
        /// Frames lost
        dropped_frames: Frames,
    },
}

/// Header pushed after each captured block's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureBlock {
    /// Window the block was captured for
    pub window: u32,
    /// Frames in the block
    pub frames: u32,
    /// Sample layout of the block
    pub layout: CaptureLayout,
    /// Loop playhead at the block's first frame, if a loop was sounding
    pub loop_position: Option<u64>,
}

impl CaptureBlock {
    /// Number of samples that follow this header in the sample queue.
    pub const fn samples(&self) -> usize {
        self.frames as usize * self.layout.samples_per_frame()
    }
}

/// Values released by the audio thread, dropped on the control thread.
pub enum Retired<G> {
    Buffer(Arc<SampleBuffer>),
    Graph(G),
}

/// Snapshot published by the audio thread after every callback
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioStatus {
    /// Frames rendered since the processor was created
    pub clock: u64,
    /// Peak absolute level at the capture tap during the last callback
    pub peak: Sample,
    /// Current loop playhead, if a loop is sounding
    pub loop_position: Option<u64>,
    /// Events lost to a full event queue since the processor was created
    pub dropped_events: u64,
}

/// Queue sizes for [`create_channels`]
#[derive(Debug, Clone, Copy)]
pub struct ChannelCapacities {
    pub commands: usize,
    pub events: usize,
    pub retired: usize,
    /// Captured samples (not frames)
    pub capture_samples: usize,
    pub capture_blocks: usize,
}

impl ChannelCapacities {
    /// Capacities able to buffer `seconds` of stereo capture at `sample_rate`
    /// in blocks no smaller than `block_size`.
    pub fn for_capture(sample_rate: SampleRate, block_size: Frames, seconds: f32) -> Self {
        let frames = (sample_rate as f32 * seconds.max(0.1)) as usize;
        let blocks = frames / block_size.max(1) + 1;
        Self {
            capture_samples: frames * 2,
            // Callbacks can be much shorter than block_size
            capture_blocks: blocks * 8,
            ..Self::default()
        }
    }
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            commands: 256,
            events: 256,
            retired: 64,
            capture_samples: 48000 * 2 * 2,
            capture_blocks: 4096,
        }
    }
}

/// Create a pair of channel ends for bidirectional communication
///
/// `G` is the graph type carried from the control thread to the audio thread.
pub fn create_channels<G>(capacities: ChannelCapacities) -> (ControlChannels<G>, AudioChannels<G>) {
    let (cmd_tx, cmd_rx) = rtrb::RingBuffer::new(capacities.commands);
    let (evt_tx, evt_rx) = rtrb::RingBuffer::new(capacities.events);
    let (retired_tx, retired_rx) = rtrb::RingBuffer::new(capacities.retired);
    let (sample_tx, sample_rx) = rtrb::RingBuffer::new(capacities.capture_samples);
    let (block_tx, block_rx) = rtrb::RingBuffer::new(capacities.capture_blocks);
    let (graph_tx, graph_rx) = crossbeam_channel::unbounded();
    let (status_tx, status_rx) = TripleBuffer::new(&AudioStatus::default()).split();

    let control = ControlChannels {
        command_tx: cmd_tx,
        event_rx: evt_rx,
        retired_rx,
        graph_tx,
        capture: CaptureReceiver {
            samples: sample_rx,
            blocks: block_rx,
        },
        status_rx,
    };

    let audio = AudioChannels {
        command_rx: cmd_rx,
        event_tx: evt_tx,
        retired_tx,
        graph_rx,
        capture: CaptureSender {
            samples: sample_tx,
            blocks: block_tx,
        },
        status_tx,
    };

    (control, audio)
}

/// Capture queue ends held by the control thread
pub struct CaptureReceiver {
    pub samples: rtrb::Consumer<Sample>,
    pub blocks: rtrb::Consumer<CaptureBlock>,
}

/// Capture queue ends held by the audio thread
pub struct CaptureSender {
    pub samples: rtrb::Producer<Sample>,
    pub blocks: rtrb::Producer<CaptureBlock>,
}

impl CaptureSender {
    /// Whether a block of `samples` samples fits right now.
    pub fn has_room(&self, samples: usize) -> bool {
        self.samples.slots() >= samples && self.blocks.slots() >= 1
    }
}

/// Channels for the control thread (sends commands, receives events)
pub struct ControlChannels<G> {
    /// Command sender (Control -> Audio)
    pub command_tx: rtrb::Producer<AudioCommand>,
    /// Event receiver (Audio -> Control)
    pub event_rx: rtrb::Consumer<AudioEvent>,
    /// Released buffers and graphs (Audio -> Control)
    pub retired_rx: rtrb::Consumer<Retired<G>>,
    /// Graph sender (Control -> Audio) - separate channel for non-Clone types
    pub graph_tx: Sender<G>,
    /// Captured audio (Audio -> Control)
    pub capture: CaptureReceiver,
    /// Latest audio status (Audio -> Control)
    pub status_rx: triple_buffer::Output<AudioStatus>,
}

/// Channels for the audio thread (receives commands, sends events)
pub struct AudioChannels<G> {
    /// Command receiver (Control -> Audio)
    pub command_rx: rtrb::Consumer<AudioCommand>,
    /// Event sender (Audio -> Control)
    pub event_tx: rtrb::Producer<AudioEvent>,
    /// Released buffers and graphs (Audio -> Control)
    pub retired_tx: rtrb::Producer<Retired<G>>,
    /// Graph receiver (Control -> Audio) - `try_recv` is non-blocking
    pub graph_rx: Receiver<G>,
    /// Captured audio (Audio -> Control)
    pub capture: CaptureSender,
    /// Latest audio status (Audio -> Control)
    pub status_tx: triple_buffer::Input<AudioStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let (mut control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        assert!(control.command_tx.push(AudioCommand::Disarm).is_ok());
        assert!(matches!(audio.command_rx.pop(), Ok(AudioCommand::Disarm)));
    }

    #[test]
    fn test_status_is_latest_value() {
        let (mut control, mut audio) = create_channels::<()>(ChannelCapacities::default());
        audio.status_tx.write(AudioStatus {
            clock: 64,
            peak: 0.1,
            loop_position: None,
            dropped_events: 0,
        });
        audio.status_tx.write(AudioStatus {
            clock: 128,
            peak: 0.2,
            loop_position: Some(5),
            dropped_events: 2,
        });
        let status = *control.status_rx.read();
        assert_eq!(status.clock, 128);
        assert_eq!(status.loop_position, Some(5));
        assert_eq!(status.dropped_events, 2);
    }

    #[test]
    fn test_capture_block_sample_count() {
        let block = CaptureBlock {
            window: 1,
            frames: 64,
            layout: CaptureLayout::Stereo,
            loop_position: None,
        };
        assert_eq!(block.samples(), 128);
        let mono = CaptureBlock {
            layout: CaptureLayout::Mono,
            ..block
        };
        assert_eq!(mono.samples(), 64);
    }

    #[test]
    fn test_capture_room() {
        let capacities = ChannelCapacities {
            capture_samples: 8,
            capture_blocks: 1,
            ..ChannelCapacities::default()
        };
        let (_control, audio) = create_channels::<()>(capacities);
        assert!(audio.capture.has_room(8));
        assert!(!audio.capture.has_room(9));
    }
}
