use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub mod protocol;

pub use protocol::{ClientMessage, Event};

/// A named delivery channel.
///
/// Three topic families exist: a driver's own topic, a house topic (the
/// resident's view of that house), and the shared operations console topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Driver(String),
    House(String),
    Ops,
}

impl Topic {
    pub fn driver(id: impl Into<String>) -> Self {
        Topic::Driver(id.into())
    }

    pub fn house(id: impl Into<String>) -> Self {
        Topic::House(id.into())
    }

    /// Parse a topic from its wire form: `driver/{id}`, `house/{id}`, `ops`.
    pub fn parse(s: &str) -> Option<Topic> {
        if s == "ops" {
            return Some(Topic::Ops);
        }
        match s.split_once('/') {
            Some(("driver", id)) if !id.is_empty() => Some(Topic::Driver(id.to_string())),
            Some(("house", id)) if !id.is_empty() => Some(Topic::House(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Driver(id) => write!(f, "driver/{}", id),
            Topic::House(id) => write!(f, "house/{}", id),
            Topic::Ops => write!(f, "ops"),
        }
    }
}

/// Opaque handle identifying one subscriber connection.
pub type SubscriberId = Uuid;

/// Sending half of a subscriber's delivery channel.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Topic router: dynamic membership plus typed multicast.
///
/// Membership is ephemeral — created on first join, dropped on last leave.
/// Delivery is fire-and-forget over unbounded channels, so a slow or
/// disconnected member never blocks the publisher or its peers. There is no
/// buffering: members joining after a publish do not see it.
pub struct TopicRouter {
    topics: DashMap<Topic, HashMap<SubscriberId, EventSender>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Create a subscriber handle and its delivery channel.
    pub fn subscriber() -> (SubscriberId, EventSender, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Uuid::new_v4(), tx, rx)
    }

    /// Add a subscriber to a topic. Idempotent — a repeat join for the same
    /// handle replaces the sender and does not duplicate membership.
    pub fn join(&self, topic: Topic, id: SubscriberId, sender: EventSender) {
        debug!(topic = %topic, subscriber = %id, "Subscriber joined topic");
        self.topics.entry(topic).or_default().insert(id, sender);
    }

    /// Remove a subscriber from a topic. Missing membership is not an error.
    pub fn leave(&self, topic: &Topic, id: SubscriberId) {
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                drop(members);
                self.topics.remove_if(topic, |_, m| m.is_empty());
            }
        }
    }

    /// Remove a subscriber from every topic (connection closed).
    pub fn leave_all(&self, id: SubscriberId) {
        let mut emptied = Vec::new();
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(&id);
            if entry.value().is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for topic in emptied {
            self.topics.remove_if(&topic, |_, m| m.is_empty());
        }
    }

    /// Deliver an event to every current member of `topic`.
    ///
    /// A topic with no members is a no-op. Members whose receiving half is
    /// gone are pruned. Returns the number of members delivered to.
    pub fn publish(&self, topic: &Topic, event: Event) -> usize {
        let Some(mut members) = self.topics.get_mut(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sender) in members.iter() {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(topic = %topic, subscriber = %id, "Dropping dead subscriber");
                dead.push(*id);
            }
        }
        for id in dead {
            members.remove(&id);
        }
        delivered
    }

    /// Current member count for a topic.
    pub fn member_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::{DriverUnassigned, Event};
    use super::*;

    fn test_event(house: &str) -> Event {
        Event::DriverUnassigned(DriverUnassigned {
            house_id: house.to_string(),
            driver_id: "d1".to_string(),
        })
    }

    #[test]
    fn test_topic_parse_and_display() {
        assert_eq!(Topic::parse("ops"), Some(Topic::Ops));
        assert_eq!(Topic::parse("driver/d1"), Some(Topic::driver("d1")));
        assert_eq!(Topic::parse("house/h42"), Some(Topic::house("h42")));
        assert_eq!(Topic::parse("house/"), None);
        assert_eq!(Topic::parse("sector/s1"), None);
        assert_eq!(Topic::parse(""), None);

        assert_eq!(Topic::house("h42").to_string(), "house/h42");
        assert_eq!(Topic::Ops.to_string(), "ops");
    }

    #[tokio::test]
    async fn test_publish_reaches_members() {
        let router = TopicRouter::new();
        let (id, tx, mut rx) = TopicRouter::subscriber();
        router.join(Topic::house("h42"), id, tx);

        let delivered = router.publish(&Topic::house("h42"), test_event("h42"));
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), test_event("h42"));
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let router = TopicRouter::new();
        let (id, tx, mut rx) = TopicRouter::subscriber();
        router.join(Topic::house("h42"), id, tx);

        router.publish(&Topic::house("h43"), test_event("h43"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let router = TopicRouter::new();
        let (id, tx, mut rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, id, tx.clone());
        router.join(Topic::Ops, id, tx);

        assert_eq!(router.member_count(&Topic::Ops), 1);
        let delivered = router.publish(&Topic::Ops, test_event("h1"));
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_to_empty_topic_is_noop() {
        let router = TopicRouter::new();
        assert_eq!(router.publish(&Topic::Ops, test_event("h1")), 0);
    }

    #[test]
    fn test_leave_missing_membership_is_ok() {
        let router = TopicRouter::new();
        let (id, tx, _rx) = TopicRouter::subscriber();
        router.leave(&Topic::Ops, id);
        router.join(Topic::Ops, id, tx);
        router.leave(&Topic::house("never-joined"), id);
        assert_eq!(router.member_count(&Topic::Ops), 1);
    }

    #[tokio::test]
    async fn test_leave_all_clears_every_topic() {
        let router = TopicRouter::new();
        let (id, tx, _rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, id, tx.clone());
        router.join(Topic::driver("d1"), id, tx.clone());
        router.join(Topic::house("h1"), id, tx);

        router.leave_all(id);
        assert_eq!(router.member_count(&Topic::Ops), 0);
        assert_eq!(router.member_count(&Topic::driver("d1")), 0);
        assert_eq!(router.member_count(&Topic::house("h1")), 0);
    }

    #[tokio::test]
    async fn test_per_topic_ordering() {
        let router = TopicRouter::new();
        let (id, tx, mut rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, id, tx);

        for house in ["h1", "h2", "h3"] {
            router.publish(&Topic::Ops, test_event(house));
        }
        for house in ["h1", "h2", "h3"] {
            assert_eq!(rx.recv().await.unwrap(), test_event(house));
        }
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_pruned() {
        let router = TopicRouter::new();
        let (dead_id, dead_tx, dead_rx) = TopicRouter::subscriber();
        let (live_id, live_tx, mut live_rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, dead_id, dead_tx);
        router.join(Topic::Ops, live_id, live_tx);

        drop(dead_rx);
        let delivered = router.publish(&Topic::Ops, test_event("h1"));
        assert_eq!(delivered, 1);
        assert_eq!(router.member_count(&Topic::Ops), 1);
        assert!(live_rx.recv().await.is_some());
    }
}
