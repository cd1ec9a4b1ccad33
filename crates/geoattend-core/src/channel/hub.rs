//! Broadcast hub for server events
//!
//! Fan-out is best-effort and at-most-once per current subscriber: a
//! receiver that lags past the channel capacity loses the oldest
//! events, and a client that connects after an event was published
//! catches up through the state-request flow instead.

use tokio::sync::broadcast;
use tracing::debug;

use super::protocol::ServerEvent;

/// Maximum events buffered per subscriber before lagging clients drop events
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast fan-out of server events to all connected subscribers
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    /// Create a hub with the given per-subscriber buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that received it; zero when
    /// nobody is listening, which is not an error.
    pub fn publish(&self, event: ServerEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Event published with no subscribers");
                0
            }
        }
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let hub = EventHub::default();
        let delivered = hub.publish(ServerEvent::SessionExpired {
            message: "Session ended.".to_string(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events() {
        let hub = EventHub::new(16);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        let delivered = hub.publish(ServerEvent::StatsUpdate {
            count: 1,
            new_record: None,
        });
        assert_eq!(delivered, 2);

        for receiver in [&mut first, &mut second] {
            match receiver.recv().await.unwrap() {
                ServerEvent::StatsUpdate { count, .. } => assert_eq!(count, 1),
                other => panic!("Unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let hub = EventHub::new(16);
        hub.publish(ServerEvent::StatsUpdate {
            count: 5,
            new_record: None,
        });

        let mut late = hub.subscribe();
        hub.publish(ServerEvent::StatsUpdate {
            count: 6,
            new_record: None,
        });

        // Only the event published after subscribing arrives
        match late.recv().await.unwrap() {
            ServerEvent::StatsUpdate { count, .. } => assert_eq!(count, 6),
            other => panic!("Unexpected event: {other:?}"),
        }
        assert!(late.try_recv().is_err());
    }
}
