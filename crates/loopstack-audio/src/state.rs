//! Engine state and change notification.

use std::fmt;

/// Looper state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EngineState {
    #[default]
    Idle,
    Recording,
    Playing,
    Overdubbing,
}

impl EngineState {
    /// Whether a capture window is open in this state
    pub fn is_capturing(self) -> bool {
        matches!(self, Self::Recording | Self::Overdubbing)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Playing => "playing",
            Self::Overdubbing => "overdubbing",
        };
        f.write_str(name)
    }
}

/// A published state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
    /// Active track after the change
    pub track: usize,
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&Transition) + Send>;

/// Synchronous state observers, notified in subscription order.
#[derive(Default)]
pub struct StateBroadcaster {
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: SubscriptionId,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` and call it right away with `current`.
    pub fn subscribe(
        &mut self,
        current: Transition,
        mut subscriber: impl FnMut(&Transition) + Send + 'static,
    ) -> SubscriptionId {
        subscriber(&current);
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn publish(&mut self, transition: &Transition) {
        for (_, subscriber) in &mut self.subscribers {
            subscriber(transition);
        }
    }
}
