use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

/// Receiving end of a single source.
pub type EventReceiver = mpsc::Receiver<Event>;
pub(crate) type EventSender = mpsc::Sender<Event>;

/// An event emitted by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// When the source emitted the event.
    pub created_at: Instant,
    /// Number of interval decays the source had gone through when emitting.
    pub interval: usize,
    /// Index of the emitting source.
    pub source: usize,
    /// Position of the event in its source's stream, starting at 0.
    pub sequence: u64,
}

/// An event together with the time a drain observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventResult {
    pub event: Event,
    pub handled_at: Instant,
}

impl EventResult {
    /// Time between emission and handling.
    pub fn latency(&self) -> Duration {
        self.handled_at.saturating_duration_since(self.event.created_at)
    }
}

/// Stamps an event as handled now. Every drain goes through this.
pub fn handle_event(event: Event) -> EventResult {
    EventResult {
        event,
        handled_at: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn latency_is_measured_from_creation() {
        let event = Event {
            created_at: Instant::now(),
            interval: 3,
            source: 1,
            sequence: 0,
        };
        tokio::time::sleep(Duration::from_millis(2)).await;
        let result = handle_event(event);
        assert_eq!(result.event, event);
        assert!(result.latency() >= Duration::from_millis(2));
        assert!(result.latency() < Duration::from_millis(3));
    }
}
