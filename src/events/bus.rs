//! Topic-based pub/sub for progress and status-change events.
//!
//! Each topic is backed by a broadcast channel; every subscription gets an
//! independent bounded queue of `event_queue_capacity` events. Publication
//! never blocks: with no live subscribers it is a no-op, and a slow
//! subscriber loses the oldest events and observes an [`Event::Lagged`]
//! marker in their place. Delivery is FIFO per topic per subscription;
//! nothing is guaranteed across topics.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::types::Event;

pub struct EventBus {
    topics: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Deliver `event` to every live subscription on `topic`.
    ///
    /// Topics whose last subscriber has gone away are garbage-collected
    /// here rather than on unsubscribe, so dropping a subscription stays
    /// a plain drop.
    pub fn publish(&self, topic: &str, event: Event) {
        let stale = {
            let topics = self.topics.read();
            match topics.get(topic) {
                Some(sender) if sender.receiver_count() > 0 => {
                    // send() only errors when there are no receivers, and
                    // that race is benign.
                    let _ = sender.send(event);
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        if stale {
            let mut topics = self.topics.write();
            if let Some(sender) = topics.get(topic) {
                if sender.receiver_count() == 0 {
                    topics.remove(topic);
                }
            }
        }
    }

    /// Open a subscription on `topic`. Dropping the returned value closes it.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            topic: topic.to_string(),
            rx: sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// One consumer's bounded view of a topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event, or `None` once the topic is gone and the queue drained.
    ///
    /// Overflow surfaces as an [`Event::Lagged`] marker carrying the number
    /// of dropped events; receiving resumes at the oldest retained event.
    pub async fn recv(&mut self) -> Option<Event> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(Event::Lagged { missed }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when empty.
    pub fn try_recv(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Some(Event::Lagged { missed })
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_event(running_jobs: usize) -> Event {
        Event::SystemStatus {
            running_jobs,
            max_workers: 5,
            active_users: 0,
            queued_users: 0,
            max_active_users: 3,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fifo_within_topic() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe("system");

        for i in 0..5 {
            bus.publish("system", system_event(i));
        }
        for i in 0..5 {
            match sub.recv().await {
                Some(Event::SystemStatus { running_jobs, .. }) => assert_eq!(running_jobs, i),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_overflow_delivers_lagged_marker() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe("system");

        for i in 0..6 {
            bus.publish("system", system_event(i));
        }
        match sub.recv().await {
            Some(Event::Lagged { missed }) => assert!(missed >= 1),
            other => panic!("expected lagged marker, got {other:?}"),
        }
        // The retained tail is still delivered in order.
        match sub.recv().await {
            Some(Event::SystemStatus { running_jobs, .. }) => assert!(running_jobs >= 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish("system", system_event(0));
        assert_eq!(bus.subscriber_count("system"), 0);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe("job.a");
        let mut b = bus.subscribe("job.b");

        bus.publish("job.a", system_event(1));
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_garbage_collected() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe("system");
        assert_eq!(bus.subscriber_count("system"), 1);
        drop(sub);
        // Next publish notices the dead topic and collects it.
        bus.publish("system", system_event(0));
        assert!(bus.topics.read().get("system").is_none());
    }
}
