//! Event fan-out to connected observers
//!
//! Thin wrapper over a tokio broadcast channel. Publishing never blocks and
//! never fails: with no subscribers the event is simply dropped, and a slow
//! subscriber lags (losing oldest events) instead of stalling a job worker.

use tokio::sync::broadcast;

use crate::domain::events::AutomationEvent;

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<AutomationEvent>,
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget delivery to all current subscribers.
    pub fn publish(&self, event: AutomationEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobProgress, JobType};

    fn progress_event() -> AutomationEvent {
        AutomationEvent::ProgressUpdate {
            job_type: JobType::NameStandardizer,
            progress: JobProgress::default(),
            current_record: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.publish(progress_event());
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[tokio::test]
    async fn events_reach_every_subscriber_in_order() {
        let broadcaster = EventBroadcaster::default();
        let mut rx_a = broadcaster.subscribe();
        let mut rx_b = broadcaster.subscribe();

        for _ in 0..3 {
            broadcaster.publish(progress_event());
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for _ in 0..3 {
                let event = rx.recv().await.unwrap();
                assert_eq!(event.job_type(), Some(JobType::NameStandardizer));
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publisher() {
        let broadcaster = EventBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();

        for _ in 0..10 {
            broadcaster.publish(progress_event());
        }

        // The first recv reports how many events were dropped.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 6),
            other => panic!("expected lag error, got {other:?}"),
        }
    }
}
