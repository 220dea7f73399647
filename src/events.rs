use crate::model::{MediaReference, PlaybackPhase, TrackKind, VideoSize};
use crossbeam_channel::{Receiver, Sender, unbounded};

/// Raw notifications from the decode/render engine. May be sent from any thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    StateChanged(BackendState),
    TimeChanged { time_ms: i64, duration_ms: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Opening,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

/// Player (engine adapter) changes, published after the state is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    ReferenceChanged(Option<MediaReference>),
    StateChanged {
        is_playing: bool,
        phase: PlaybackPhase,
    },
    TimeChanged {
        time_ms: i64,
        duration_ms: i64,
    },
    VideoSizeChanged(VideoSize),
    VolumeChanged(f32),
    TracksChanged,
    TrackSelected {
        id: Option<i32>,
        kind: TrackKind,
    },
    Completed(MediaReference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    ItemsChanged { len: usize },
    CurrentChanged(Option<usize>),
    Cleared,
}

/// Fan-out of one component's events to any number of observers.
pub struct EventBus<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: E) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let mut bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(QueueEvent::ItemsChanged { len: 1 });
        bus.publish(QueueEvent::CurrentChanged(Some(0)));

        for rx in [first, second] {
            let seen: Vec<QueueEvent> = rx.try_iter().collect();
            assert_eq!(
                seen,
                vec![
                    QueueEvent::ItemsChanged { len: 1 },
                    QueueEvent::CurrentChanged(Some(0)),
                ]
            );
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(QueueEvent::Cleared);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(QueueEvent::Cleared));
    }
}
