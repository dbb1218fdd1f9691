//! Input level metering.
//!
//! The audio thread computes the peak of the capture tap for every callback
//! and publishes it with the status snapshot. The meter here turns those
//! snapshots into notifications at a bounded rate.

use std::time::{Duration, Instant};

use loopstack_core::Sample;

/// Callback receiving levels in `[0.0, 1.0]`
pub type LevelListener = Box<dyn FnMut(f32) + Send>;

pub struct LevelMeter {
    interval: Duration,
    last_emit: Option<Instant>,
    level: f32,
    listener: Option<LevelListener>,
}

impl LevelMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            level: 0.0,
            listener: None,
        }
    }

    /// Install the listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: LevelListener) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Last level seen
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Feed a new peak. Returns the level if a notification was due.
    pub fn update(&mut self, peak: Sample, now: Instant) -> Option<f32> {
        self.level = peak.abs().min(1.0);

        let due = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return None;
        }

        self.last_emit = Some(now);
        if let Some(listener) = self.listener.as_mut() {
            listener(self.level);
        }
        Some(self.level)
    }
}

/// Peak absolute value over the first `frames` frames of both channels
pub fn peak_of(channels: [&[Sample]; 2]) -> Sample {
    channels
        .iter()
        .flat_map(|ch| ch.iter())
        .fold(0.0_f32, |max, &s| max.max(s.abs()))
}
