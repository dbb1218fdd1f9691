//! Loop buffer store.
//!
//! Each track holds its current loop and the loop it replaced, giving one
//! level of undo. Buffers are shared as `Arc`s so the playback voice can
//! hold one while the store moves on.

use std::sync::Arc;

use loopstack_core::{Frames, SampleBuffer};

/// One track's loop slots
#[derive(Debug, Default, Clone)]
pub struct Track {
    current: Option<Arc<SampleBuffer>>,
    previous: Option<Arc<SampleBuffer>>,
}

impl Track {
    pub fn current(&self) -> Option<&Arc<SampleBuffer>> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Arc<SampleBuffer>> {
        self.previous.as_ref()
    }
}

#[derive(Debug)]
pub struct LoopStore {
    tracks: Vec<Track>,
}

impl LoopStore {
    pub fn new(track_count: usize) -> Self {
        Self {
            tracks: vec![Track::default(); track_count],
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn current(&self, index: usize) -> Option<&Arc<SampleBuffer>> {
        self.tracks.get(index)?.current.as_ref()
    }

    pub fn has_loop(&self, index: usize) -> bool {
        self.current(index).is_some()
    }

    /// Whether `undo` would succeed
    pub fn can_undo(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.previous.is_some())
    }

    pub fn loop_length(&self, index: usize) -> Option<Frames> {
        self.current(index).map(|b| b.len())
    }

    /// Make `buffer` the track's loop; the old loop becomes the undo slot.
    pub fn commit(&mut self, index: usize, buffer: Arc<SampleBuffer>) -> bool {
        let Some(track) = self.tracks.get_mut(index) else {
            return false;
        };
        track.previous = track.current.replace(buffer);
        true
    }

    /// Restore the undo slot. The undo slot is emptied, so a second undo fails.
    pub fn undo(&mut self, index: usize) -> bool {
        let Some(track) = self.tracks.get_mut(index) else {
            return false;
        };
        match track.previous.take() {
            Some(previous) => {
                track.current = Some(previous);
                true
            }
            None => false,
        }
    }

    /// Empty both slots of a track.
    pub fn clear(&mut self, index: usize) -> bool {
        let Some(track) = self.tracks.get_mut(index) else {
            return false;
        };
        *track = Track::default();
        true
    }
}
