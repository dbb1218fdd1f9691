//! Shared fixtures: a looper driven by a manual audio callback.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use loopstack_audio::{
    AudioProcessor, EngineConfig, EngineState, InputSpec, LoopEngine, ProcessingMode, Transition,
};

pub const OUTPUT_CHANNELS: usize = 2;

/// Deterministic settings: no gain smoothing, unity trim, no high-pass
pub fn settings() -> EngineConfig {
    let mut settings = EngineConfig {
        block_size: 64,
        gain_smoothing_ms: 0.0,
        ..EngineConfig::default()
    };
    settings.graph.processing_mode = ProcessingMode::Raw;
    settings.graph.master_volume = 1.0;
    settings
}

pub fn mono(settings: &EngineConfig) -> InputSpec {
    InputSpec {
        channels: 1,
        sample_rate: settings.sample_rate,
    }
}

/// A looper plus the processor its audio callback would run
pub struct Rig {
    pub looper: LoopEngine,
    pub processor: AudioProcessor,
    now: Instant,
    sample_rate: u32,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: EngineConfig) -> Self {
        let sample_rate = settings.sample_rate;
        let input = mono(&settings);
        let (looper, processor) = LoopEngine::new(settings, input).expect("valid settings");
        Self {
            looper,
            processor,
            now: Instant::now(),
            sample_rate,
        }
    }

    /// Run one callback of `frames` frames of constant mono input, then
    /// poll the looper. Returns the interleaved stereo output.
    pub fn render(&mut self, value: f32, frames: usize) -> Vec<f32> {
        let input = vec![value; frames * self.processor.input_channels()];
        let mut output = vec![0.0; frames * OUTPUT_CHANNELS];
        self.processor.render(&input, &mut output, OUTPUT_CHANNELS);

        self.now += Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate));
        self.looper.poll_at(self.now);
        output
    }

    /// Let `elapsed` pass without any audio callback, then poll.
    pub fn idle(&mut self, elapsed: Duration) {
        self.now += elapsed;
        self.looper.poll_at(self.now);
    }

    /// Record `frames` frames of `value` and close them into a loop.
    pub fn record_loop(&mut self, value: f32, frames: usize) {
        assert!(self.looper.record());
        self.render(value, frames);
        assert!(self.looper.stop_recording_to_loop());
    }

    /// Collect every published transition
    pub fn watch(&mut self) -> Arc<Mutex<Vec<Transition>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.looper.subscribe(move |t| sink.lock().unwrap().push(*t));
        seen
    }

    pub fn state(&self) -> EngineState {
        self.looper.state()
    }
}
