//! Looper control context.
//!
//! [`LoopEngine`] is the single control-thread object the orchestrator talks
//! to. It owns the loop store, the state machine, the routing configuration
//! and the control ends of the channel set. Its audio-thread counterpart is
//! the [`AudioProcessor`] returned alongside it.
//!
//! Commands that do not apply in the current state return `false` and change
//! nothing. Configuration changes that need a new graph return an error if
//! the graph cannot be built; the running graph and the configuration are
//! then left as they were.

use std::sync::Arc;
use std::time::{Duration, Instant};

use loopstack_comms::{
    AudioCommand, AudioEvent, AudioStatus, ChannelCapacities, ControlChannels, GainStage,
    Retired, create_channels, crossbeam_channel, rtrb, triple_buffer,
};
use loopstack_core::{Frames, SampleBuffer};
use loopstack_module::ProcessingModule;

use crate::capture::CapturePipeline;
use crate::chain::ModuleChain;
use crate::config::{EngineConfig, GraphConfig, ProcessingMode};
use crate::error::EngineError;
use crate::graph::{InputSpec, SignalGraph, build_graph, check_module};
use crate::meter::LevelMeter;
use crate::mixer;
use crate::playback::PlaybackScheduler;
use crate::processor::{AudioProcessor, GraphBox};
use crate::state::{EngineState, StateBroadcaster, SubscriptionId, Transition};
use crate::store::LoopStore;

/// Extra time an overdub may run past its loop length before it is closed
/// on wall-clock time alone.
const OVERDUB_GRACE: Duration = Duration::from_millis(250);

/// Wall-clock limit of an open overdub.
///
/// Runs on the clock `poll_at` is driven with: it starts at the first poll
/// after the overdub is armed.
struct OverdubTimer {
    span: Duration,
    started: Option<Instant>,
}

impl OverdubTimer {
    fn new(span: Duration) -> Self {
        Self {
            span,
            started: None,
        }
    }

    fn expired(&mut self, now: Instant) -> bool {
        let started = *self.started.get_or_insert(now);
        now.saturating_duration_since(started) >= self.span
    }
}

/// Control ends of the channel set, minus the capture queue
struct AudioLink {
    command_tx: rtrb::Producer<AudioCommand>,
    event_rx: rtrb::Consumer<AudioEvent>,
    retired_rx: rtrb::Consumer<Retired<GraphBox>>,
    graph_tx: crossbeam_channel::Sender<GraphBox>,
    status_rx: triple_buffer::Output<AudioStatus>,
}

pub struct LoopEngine {
    settings: EngineConfig,
    config: GraphConfig,
    input: InputSpec,
    chain: ModuleChain,

    store: LoopStore,
    state: EngineState,
    broadcaster: StateBroadcaster,

    capture: CapturePipeline,
    playback: PlaybackScheduler,
    meter: LevelMeter,
    link: AudioLink,

    overdub_timer: Option<OverdubTimer>,
    status: AudioStatus,
    /// Audio events known to be lost so far
    dropped_events: u64,
}

impl LoopEngine {
    /// Create the engine and the audio processor for an input stream.
    ///
    /// The processor is handed to whatever drives audio callbacks: a device
    /// stream or an offline renderer.
    pub fn new(
        settings: EngineConfig,
        input: InputSpec,
    ) -> Result<(Self, AudioProcessor), EngineError> {
        settings.validate()?;
        let chain = ModuleChain::from_specs(&settings.modules)?;
        let config = settings.graph.clone();
        let graph = build_graph(&input, &config, &chain, &settings)?;
        let (link, receiver, processor) = open_link(&settings, &input, graph);

        tracing::info!(
            "Loop engine ready: {} Hz, block {}, {} tracks, {}-channel input",
            settings.sample_rate,
            settings.block_size,
            settings.track_count,
            input.channels
        );

        let engine = Self {
            capture: CapturePipeline::new(
                receiver,
                CapturePipeline::layout_for(input.channels),
                settings.sample_rate,
            ),
            playback: PlaybackScheduler::new(settings.playback_offset_frames()),
            meter: LevelMeter::new(Duration::from_secs_f32(
                settings.meter_interval_ms.max(0.0) / 1000.0,
            )),
            store: LoopStore::new(settings.track_count),
            state: EngineState::Idle,
            broadcaster: StateBroadcaster::new(),
            overdub_timer: None,
            status: AudioStatus::default(),
            dropped_events: 0,
            link,
            chain,
            config,
            input,
            settings,
        };
        Ok((engine, processor))
    }

    /// Replace the input stream.
    ///
    /// Builds a graph for the new input and a fresh processor for it; the
    /// previous processor must be discarded by the caller. An open capture
    /// window is committed first, as `stop` would. Loops are kept, and a
    /// loop that was playing resumes on the new processor. On error nothing
    /// changes.
    pub fn attach(&mut self, input: InputSpec) -> Result<AudioProcessor, EngineError> {
        self.attach_with(input, Ok)
    }

    /// Replace the input stream once `start` has put the new processor to
    /// work.
    ///
    /// `start` receives the processor for `input` and returns whatever runs
    /// it, typically a pair of device streams. Until it succeeds the engine
    /// keeps talking to the current processor; if it fails, the engine is
    /// left exactly as it was.
    pub fn attach_with<T>(
        &mut self,
        input: InputSpec,
        start: impl FnOnce(AudioProcessor) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let graph = build_graph(&input, &self.config, &self.chain, &self.settings)?;
        let (link, receiver, processor) = open_link(&self.settings, &input, graph);
        let running = start(processor)?;

        let was = self.state;
        let committed = was.is_capturing() && self.close_window();
        self.collect_garbage();

        self.link = link;
        self.capture.reconnect(receiver, CapturePipeline::layout_for(input.channels));
        self.playback.reset();
        self.status = AudioStatus::default();
        self.dropped_events = 0;
        self.input = input;

        let resume = match was {
            EngineState::Playing | EngineState::Overdubbing => true,
            EngineState::Recording => committed,
            EngineState::Idle => false,
        };
        let next = if resume && self.play_active() {
            EngineState::Playing
        } else {
            EngineState::Idle
        };
        if next != was {
            self.transition(next);
        }

        tracing::info!(
            "Attached {}-channel input at {} Hz",
            input.channels,
            input.sample_rate
        );
        Ok(running)
    }

    // ---- state machine ----

    /// Single-button record: start recording, or close the recording into a loop.
    pub fn record(&mut self) -> bool {
        match self.state {
            EngineState::Idle | EngineState::Playing => self.begin_recording(),
            EngineState::Recording => {
                self.finish_recording();
                true
            }
            EngineState::Overdubbing => false,
        }
    }

    pub fn start_recording(&mut self) -> bool {
        matches!(self.state, EngineState::Idle | EngineState::Playing) && self.begin_recording()
    }

    /// Close the recording. Returns true if a loop was committed; an empty
    /// recording returns to Idle and returns false.
    pub fn stop_recording_to_loop(&mut self) -> bool {
        self.state == EngineState::Recording && self.finish_recording()
    }

    /// Single-button overdub: start layering, or close the layer.
    pub fn overdub(&mut self) -> bool {
        match self.state {
            EngineState::Playing => self.begin_overdub(),
            EngineState::Overdubbing => {
                self.finish_overdub();
                true
            }
            _ => false,
        }
    }

    pub fn start_overdub(&mut self) -> bool {
        self.state == EngineState::Playing && self.begin_overdub()
    }

    pub fn stop_overdub(&mut self) -> bool {
        if self.state != EngineState::Overdubbing {
            return false;
        }
        self.finish_overdub();
        true
    }

    /// (Re)start playback of the active track's loop.
    pub fn play_loop(&mut self) -> bool {
        if !matches!(self.state, EngineState::Idle | EngineState::Playing) {
            return false;
        }
        if !self.play_active() {
            return false;
        }
        self.transition(EngineState::Playing);
        true
    }

    pub fn stop(&mut self) -> bool {
        match self.state {
            EngineState::Idle => false,
            EngineState::Recording => {
                self.finish_recording();
                true
            }
            EngineState::Overdubbing => {
                self.finish_overdub();
                true
            }
            EngineState::Playing => {
                self.playback.stop(&mut self.link.command_tx);
                self.transition(EngineState::Idle);
                true
            }
        }
    }

    /// Drop the active track's loops and any open capture.
    pub fn clear(&mut self) -> bool {
        self.capture.abort(&mut self.link.command_tx);
        self.overdub_timer = None;
        self.playback.stop(&mut self.link.command_tx);
        self.store.clear(self.config.active_track);
        self.transition(EngineState::Idle);
        true
    }

    /// Restore the active track's previous loop.
    pub fn undo(&mut self) -> bool {
        let track = self.config.active_track;
        if !self.store.can_undo(track) {
            return false;
        }

        if self.state.is_capturing() {
            self.capture.abort(&mut self.link.command_tx);
            self.overdub_timer = None;
        }
        self.store.undo(track);
        self.play_active();
        self.transition(EngineState::Playing);
        true
    }

    /// Make `index` the active track.
    ///
    /// Returns false for an out-of-range index and true otherwise; selecting
    /// the active track changes nothing.
    pub fn select_track(&mut self, index: usize) -> bool {
        if index >= self.store.track_count() {
            return false;
        }
        if index == self.config.active_track {
            return true;
        }

        if self.state.is_capturing() {
            self.close_window();
        }
        self.playback.stop(&mut self.link.command_tx);
        self.config.active_track = index;

        let next = if self.play_active() {
            EngineState::Playing
        } else {
            EngineState::Idle
        };
        self.transition(next);
        true
    }

    fn begin_recording(&mut self) -> bool {
        let limit = self.settings.max_loop_frames().max(1);
        if !self.capture.arm(&mut self.link.command_tx, Some(limit)) {
            return false;
        }
        self.playback.stop(&mut self.link.command_tx);
        self.transition(EngineState::Recording);
        true
    }

    fn finish_recording(&mut self) -> bool {
        let committed = self.close_window();
        if committed {
            self.play_active();
            self.transition(EngineState::Playing);
        } else {
            self.transition(EngineState::Idle);
        }
        committed
    }

    fn begin_overdub(&mut self) -> bool {
        let Some(base) = self.store.current(self.config.active_track) else {
            return false;
        };
        let frames = base.len();
        let duration = base.duration();

        if !self.capture.arm(&mut self.link.command_tx, Some(frames)) {
            return false;
        }

        let offset =
            Duration::from_secs_f32(self.settings.playback_start_offset_ms.max(0.0) / 1000.0);
        self.overdub_timer = Some(OverdubTimer::new(duration + offset + OVERDUB_GRACE));
        self.transition(EngineState::Overdubbing);
        true
    }

    fn finish_overdub(&mut self) {
        if self.close_window() {
            self.play_active();
        }
        self.transition(EngineState::Playing);
    }

    /// Close the capture window and commit its audio to the active track.
    ///
    /// A recording is committed as is; an overdub is mixed onto the current
    /// loop. Returns true if a new loop was committed.
    fn close_window(&mut self) -> bool {
        let overdub = self.state == EngineState::Overdubbing;
        self.overdub_timer = None;

        let Some(take) = self.capture.disarm(&mut self.link.command_tx) else {
            tracing::debug!("Capture window closed empty");
            return false;
        };

        let track = self.config.active_track;
        let buffer = if overdub {
            let Some(base) = self.store.current(track) else {
                return false;
            };
            let offset = take
                .loop_offset
                .and_then(|o| usize::try_from(o).ok())
                .unwrap_or(0);
            match mixer::mix_aligned(base, &take.buffer, offset, &self.settings.mix) {
                Ok(mixed) => mixed,
                Err(e) => {
                    tracing::error!("Overdub mix failed: {}", e);
                    return false;
                }
            }
        } else {
            take.buffer
        };

        tracing::info!("Committed {} frames to track {}", buffer.len(), track);
        self.store.commit(track, Arc::new(buffer))
    }

    /// Schedule the active track's loop. False if it has none.
    fn play_active(&mut self) -> bool {
        let track = self.config.active_track;
        let Some(buffer) = self.store.current(track).cloned() else {
            return false;
        };
        let clock = self.read_status().clock;
        self.playback
            .play(track, buffer, clock, &mut self.link.command_tx)
    }

    fn transition(&mut self, to: EngineState) {
        let from = self.state;
        self.state = to;
        let transition = Transition {
            from,
            to,
            track: self.config.active_track,
        };
        tracing::info!("State {} -> {} (track {})", from, to, transition.track);
        self.broadcaster.publish(&transition);
    }

    // ---- routing ----

    pub fn set_processing_mode(&mut self, mode: ProcessingMode) -> Result<(), EngineError> {
        if self.config.processing_mode == mode {
            return Ok(());
        }
        let next = GraphConfig {
            processing_mode: mode,
            ..self.config.clone()
        };
        self.install_graph(next)
    }

    pub fn set_low_latency_mode(&mut self, enabled: bool) -> Result<(), EngineError> {
        if self.config.low_latency == enabled {
            return Ok(());
        }
        let next = GraphConfig {
            low_latency: enabled,
            ..self.config.clone()
        };
        self.install_graph(next)
    }

    /// Route (or stop routing) the live input to the output.
    pub fn set_input_monitoring(&mut self, enabled: bool) -> bool {
        let target = if enabled { 1.0 } else { 0.0 };
        if !self.send_gain(GainStage::Monitor, target) {
            return false;
        }
        self.config.monitor_enabled = enabled;
        true
    }

    /// Set the master volume, clamped to `[0, 1]`.
    pub fn set_master_volume(&mut self, volume: f32) -> bool {
        if volume.is_nan() {
            return false;
        }
        let volume = volume.clamp(0.0, 1.0);
        if !self.send_gain(GainStage::Master, volume) {
            return false;
        }
        self.config.master_volume = volume;
        true
    }

    fn send_gain(&mut self, stage: GainStage, target: f32) -> bool {
        let command = AudioCommand::SetGain { stage, target };
        if self.link.command_tx.push(command).is_err() {
            tracing::warn!("Command queue full, {:?} gain unchanged", stage);
            return false;
        }
        true
    }

    /// Build a graph for `config` and hand it to the audio thread.
    fn install_graph(&mut self, config: GraphConfig) -> Result<(), EngineError> {
        let graph = build_graph(&self.input, &config, &self.chain, &self.settings)?;
        self.send_graph(graph)?;
        self.config = config;
        Ok(())
    }

    fn send_graph(&mut self, graph: SignalGraph) -> Result<(), EngineError> {
        // A graph is only queued together with its InstallGraph
        if self.link.command_tx.slots() == 0 {
            return Err(EngineError::QueueFull);
        }
        if self.link.graph_tx.send(Box::new(graph)).is_err() {
            // Processor is gone; the next attach builds from the current config
            tracing::debug!("No audio processor attached, graph discarded");
            return Ok(());
        }
        if self.link.command_tx.push(AudioCommand::InstallGraph).is_err() {
            return Err(EngineError::QueueFull);
        }
        Ok(())
    }

    // ---- processing chain ----

    pub fn modules(&self) -> &ModuleChain {
        &self.chain
    }

    /// Append a module to the processing chain. Returns its position.
    pub fn add_module(&mut self, module: Box<dyn ProcessingModule>) -> Result<usize, EngineError> {
        self.insert_module(self.chain.len(), module)
    }

    /// Insert a module before position `index` (clamped to the chain end).
    pub fn insert_module(
        &mut self,
        index: usize,
        module: Box<dyn ProcessingModule>,
    ) -> Result<usize, EngineError> {
        check_module(module.as_ref())?;
        let name = module.info().name.clone();
        let index = self.chain.insert(index, module);

        if let Err(e) = self.rebuild() {
            self.chain.remove(index);
            return Err(e);
        }
        tracing::info!("Added module {} at position {}", name, index);
        Ok(index)
    }

    /// Remove the module at `index` and return it.
    pub fn remove_module(
        &mut self,
        index: usize,
    ) -> Result<Box<dyn ProcessingModule>, EngineError> {
        let module = self
            .chain
            .remove(index)
            .ok_or(EngineError::InvalidModule(index))?;

        if let Err(e) = self.rebuild() {
            self.chain.insert(index, module);
            return Err(e);
        }
        tracing::info!("Removed module {} from position {}", module.info().name, index);
        Ok(module)
    }

    /// Bypass or re-enable a module. Takes effect without a rebuild.
    pub fn set_module_bypass(&mut self, index: usize, bypassed: bool) -> Result<(), EngineError> {
        let module = self.chain.get(index).ok_or(EngineError::InvalidModule(index))?;
        module.set_bypass(bypassed);
        Ok(())
    }

    /// Set a module parameter. Takes effect without a rebuild.
    pub fn set_module_parameter(
        &mut self,
        index: usize,
        id: u32,
        value: f32,
    ) -> Result<(), EngineError> {
        let module = self.chain.get(index).ok_or(EngineError::InvalidModule(index))?;
        module.set_parameter(id, value)?;
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), EngineError> {
        let graph = build_graph(&self.input, &self.config, &self.chain, &self.settings)?;
        self.send_graph(graph)
    }

    // ---- housekeeping ----

    /// Periodic control-thread work: drain events and released buffers,
    /// collect captured audio, close windows that hit their limits and
    /// notify the level listener.
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// [`Self::poll`] with an explicit wall-clock time.
    ///
    /// Offline renders pass a clock derived from the frames rendered so far.
    pub fn poll_at(&mut self, now: Instant) {
        let status = self.read_status();
        if status.dropped_events > self.dropped_events {
            tracing::warn!(
                "Event queue full, {} audio events lost",
                status.dropped_events - self.dropped_events
            );
            self.dropped_events = status.dropped_events;
        }

        while let Ok(event) = self.link.event_rx.pop() {
            match event {
                AudioEvent::CaptureOverflow { dropped_frames } => {
                    tracing::warn!("Capture queue overflow, {} frames lost", dropped_frames);
                }
                other => tracing::debug!("Audio event: {:?}", other),
            }
        }
        self.collect_garbage();
        self.capture.drain();

        match self.state {
            EngineState::Recording if self.capture.is_full() => {
                tracing::info!("Recording reached the maximum loop length");
                self.finish_recording();
            }
            EngineState::Overdubbing => {
                let expired = self
                    .overdub_timer
                    .as_mut()
                    .is_some_and(|timer| timer.expired(now));
                if self.capture.is_full() || expired {
                    self.finish_overdub();
                }
            }
            _ => {}
        }

        self.meter.update(status.peak, now);
    }

    /// Drop everything the audio thread released.
    fn collect_garbage(&mut self) {
        while self.link.retired_rx.pop().is_ok() {}
    }

    fn read_status(&mut self) -> AudioStatus {
        self.status = *self.link.status_rx.read();
        self.status
    }

    // ---- queries and observers ----

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn active_track(&self) -> usize {
        self.config.active_track
    }

    pub fn track_count(&self) -> usize {
        self.store.track_count()
    }

    pub fn has_loop(&self, track: usize) -> bool {
        self.store.has_loop(track)
    }

    pub fn can_undo(&self, track: usize) -> bool {
        self.store.can_undo(track)
    }

    pub fn loop_length(&self, track: usize) -> Option<Frames> {
        self.store.loop_length(track)
    }

    pub fn loop_buffer(&self, track: usize) -> Option<&Arc<SampleBuffer>> {
        self.store.current(track)
    }

    pub fn is_capture_armed(&self) -> bool {
        self.capture.is_armed()
    }

    /// Frames collected so far by the open capture window
    pub fn captured_frames(&self) -> Frames {
        self.capture.captured_frames()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    pub fn input(&self) -> InputSpec {
        self.input
    }

    /// Status snapshot read by the last `poll` or command
    pub fn status(&self) -> AudioStatus {
        self.status
    }

    /// Latest input level, `[0, 1]`
    pub fn level(&self) -> f32 {
        self.meter.level()
    }

    pub fn set_level_listener(&mut self, listener: impl FnMut(f32) + Send + 'static) {
        self.meter.set_listener(Box::new(listener));
    }

    pub fn clear_level_listener(&mut self) {
        self.meter.clear_listener();
    }

    /// Observe state changes. The subscriber is called right away with the
    /// current state, then after every transition.
    pub fn subscribe(
        &mut self,
        subscriber: impl FnMut(&Transition) + Send + 'static,
    ) -> SubscriptionId {
        let current = Transition {
            from: self.state,
            to: self.state,
            track: self.config.active_track,
        };
        self.broadcaster.subscribe(current, subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }
}

fn open_link(
    settings: &EngineConfig,
    input: &InputSpec,
    graph: SignalGraph,
) -> (AudioLink, loopstack_comms::CaptureReceiver, AudioProcessor) {
    let capacities = ChannelCapacities::for_capture(
        settings.sample_rate,
        settings.block_size,
        settings.capture_queue_seconds,
    );
    let (control, audio) = create_channels(capacities);
    let processor = AudioProcessor::new(
        audio,
        Box::new(graph),
        input.channels,
        settings.crossfade_graph_swaps,
    );

    let ControlChannels {
        command_tx,
        event_rx,
        retired_rx,
        graph_tx,
        capture,
        status_rx,
    } = control;
    let link = AudioLink {
        command_tx,
        event_rx,
        retired_rx,
        graph_tx,
        status_rx,
    };
    (link, capture, processor)
}
