//! Audio-thread render loop.
//!
//! [`AudioProcessor`] owns everything the audio callback touches: the
//! installed graph, the playback voice, preallocated scratch buffers and the
//! audio ends of the channel set. `render` never allocates, locks or drops
//! heap data; released buffers and graphs go back over the retire queue.

use loopstack_comms::{
    AudioChannels, AudioCommand, AudioEvent, AudioStatus, CaptureBlock, CaptureLayout, Retired,
};
use loopstack_core::{ChannelCount, Frames, Sample};

use crate::dsp::{StereoBuffer, stereo_buffer};
use crate::graph::SignalGraph;
use crate::meter::peak_of;
use crate::playback::LoopVoice;

/// Graph type carried across the channel set
pub type GraphBox = Box<SignalGraph>;

pub struct AudioProcessor {
    channels: AudioChannels<GraphBox>,
    graph: GraphBox,
    /// Previous graph, faded out over the next block
    fading: Option<GraphBox>,
    crossfade: bool,

    voice: LoopVoice,
    capture: Option<(u32, CaptureLayout)>,
    dropped_frames: Frames,
    dropped_events: u64,

    input_channels: ChannelCount,
    block_size: Frames,
    live: StereoBuffer,
    looped: StereoBuffer,

    clock: u64,
}

impl AudioProcessor {
    pub fn new(
        channels: AudioChannels<GraphBox>,
        graph: GraphBox,
        input_channels: ChannelCount,
        crossfade: bool,
    ) -> Self {
        let block_size = graph.block_size();
        Self {
            channels,
            graph,
            fading: None,
            crossfade,
            voice: LoopVoice::new(),
            capture: None,
            dropped_frames: 0,
            dropped_events: 0,
            input_channels: input_channels.max(1),
            block_size,
            live: stereo_buffer(block_size),
            looped: stereo_buffer(block_size),
            clock: 0,
        }
    }

    /// Channels per frame expected in `render`'s input
    pub fn input_channels(&self) -> ChannelCount {
        self.input_channels
    }

    /// Frames rendered so far
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Render one callback.
    ///
    /// `input` is interleaved with [`Self::input_channels`] channels per frame;
    /// missing input frames are treated as silence. `output` is interleaved
    /// with `output_channels` channels and fully overwritten. A mono input is
    /// duplicated to both channels; a mono output receives the average of
    /// left and right.
    pub fn render(
        &mut self,
        input: &[Sample],
        output: &mut [Sample],
        output_channels: ChannelCount,
    ) {
        self.handle_commands();

        let out_ch = output_channels.max(1);
        let total = output.len() / out_ch;
        let mut peak: Sample = 0.0;
        let mut loop_position = None;
        let mut done = 0;

        while done < total {
            let frames = (total - done).min(self.block_size);
            self.load_input(input, done, frames);

            let position = self.voice.position(self.clock);
            self.voice.render(self.clock, &mut self.looped, frames);

            let live = [&self.live[0][..frames], &self.live[1][..frames]];
            let looped = [&self.looped[0][..frames], &self.looped[1][..frames]];
            self.graph.process(live, looped, frames);
            if let Some(old) = self.fading.as_mut() {
                old.process(live, looped, frames);
            }

            self.write_capture(frames, position);
            peak = peak.max(peak_of(self.graph.tap(frames)));
            self.write_output(output, done, frames, out_ch);

            if let Some(old) = self.fading.take() {
                self.retire(Retired::Graph(old));
            }

            self.clock += frames as u64;
            done += frames;
            loop_position = self.voice.position(self.clock);
        }

        // Trailing partial frame
        output[total * out_ch..].fill(0.0);

        if self.dropped_frames > 0 {
            let event = AudioEvent::CaptureOverflow {
                dropped_frames: self.dropped_frames,
            };
            if self.channels.event_tx.push(event).is_ok() {
                self.dropped_frames = 0;
            }
        }

        self.channels.status_tx.write(AudioStatus {
            clock: self.clock,
            peak,
            loop_position,
            dropped_events: self.dropped_events,
        });
    }

    fn handle_commands(&mut self) {
        while let Ok(command) = self.channels.command_rx.pop() {
            match command {
                AudioCommand::Arm { window, layout } => {
                    self.capture = Some((window, layout));
                }
                AudioCommand::Disarm => {
                    self.capture = None;
                }
                AudioCommand::StartPlayback {
                    track,
                    buffer,
                    start_at,
                } => {
                    if let Some(old) = self.voice.start(track, buffer, start_at) {
                        self.retire(Retired::Buffer(old));
                    }
                    self.notify(AudioEvent::PlaybackStarted { track });
                }
                AudioCommand::StopPlayback => {
                    if let Some(old) = self.voice.stop() {
                        self.retire(Retired::Buffer(old));
                        self.notify(AudioEvent::PlaybackStopped);
                    }
                }
                AudioCommand::SetGain { stage, target } => {
                    self.graph.set_gain(stage, target);
                }
                AudioCommand::InstallGraph => {
                    // Only the newest queued graph is installed
                    let mut latest = None;
                    while let Ok(graph) = self.channels.graph_rx.try_recv() {
                        if let Some(stale) = latest.replace(graph) {
                            self.retire(Retired::Graph(stale));
                        }
                    }
                    if let Some(graph) = latest {
                        self.install(graph);
                    }
                }
            }
        }
    }

    fn install(&mut self, graph: GraphBox) {
        let old = std::mem::replace(&mut self.graph, graph);
        if self.crossfade {
            if let Some(stale) = self.fading.replace(old) {
                self.retire(Retired::Graph(stale));
            }
        } else {
            self.retire(Retired::Graph(old));
        }
        self.notify(AudioEvent::GraphInstalled);
    }

    /// Lost events are counted in the published status.
    fn notify(&mut self, event: AudioEvent) {
        if self.channels.event_tx.push(event).is_err() {
            self.dropped_events += 1;
        }
    }

    /// Hand a value to the control thread for dropping.
    fn retire(&mut self, value: Retired<GraphBox>) {
        // The retire queue is sized well above the command rate; if it is
        // full anyway the value is dropped here.
        let _ = self.channels.retired_tx.push(value);
    }

    fn load_input(&mut self, input: &[Sample], offset: Frames, frames: Frames) {
        let in_ch = self.input_channels;
        let [left, right] = &mut self.live;
        for f in 0..frames {
            let base = (offset + f) * in_ch;
            let l = input.get(base).copied().unwrap_or(0.0);
            let r = if in_ch > 1 {
                input.get(base + 1).copied().unwrap_or(0.0)
            } else {
                l
            };
            left[f] = l;
            right[f] = r;
        }
    }

    fn write_capture(&mut self, frames: Frames, loop_position: Option<u64>) {
        let Some((window, layout)) = self.capture else {
            return;
        };

        let block = CaptureBlock {
            window,
            frames: frames as u32,
            layout,
            loop_position,
        };
        let sender = &mut self.channels.capture;
        if !sender.has_room(block.samples()) {
            self.dropped_frames += frames;
            return;
        }

        let [left, right] = self.graph.tap(frames);
        let Ok(chunk) = sender.samples.write_chunk_uninit(block.samples()) else {
            self.dropped_frames += frames;
            return;
        };
        match layout {
            CaptureLayout::Mono => {
                chunk.fill_from_iter(left.iter().copied());
            }
            CaptureLayout::Stereo => {
                chunk.fill_from_iter(left.iter().zip(right).flat_map(|(&l, &r)| [l, r]));
            }
        }
        let _ = sender.blocks.push(block);
    }

    fn write_output(&self, output: &mut [Sample], offset: Frames, frames: Frames, out_ch: usize) {
        let [new_l, new_r] = self.graph.output(frames);
        let old = self.fading.as_ref().map(|g| g.output(frames));

        for f in 0..frames {
            let (mut l, mut r) = (new_l[f], new_r[f]);
            if let Some([old_l, old_r]) = old {
                let t = (f + 1) as f32 / frames as f32;
                l = l * t + old_l[f] * (1.0 - t);
                r = r * t + old_r[f] * (1.0 - t);
            }

            let start = (offset + f) * out_ch;
            let frame = &mut output[start..start + out_ch];
            if out_ch == 1 {
                frame[0] = 0.5 * (l + r);
            } else {
                frame[0] = l;
                frame[1] = r;
                frame[2..].fill(0.0);
            }
        }
    }
}
