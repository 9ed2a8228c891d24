//! Topic-keyed subscription registry.
//!
//! Contracts subscribe to host event topics when they are attached and must
//! drop every subscription when they detach. [`EventBus::attach`] and
//! [`EventBus::detach`] are the paired entry points; [`EventBus::detach`]
//! removes a subscriber from every topic so nothing leaks past a contract's
//! lifetime.

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

/// Subscribers per topic, in subscription order.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    topics: IndexMap<String, IndexSet<String>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `subscriber` to `topic`. Returns `false` if it was already there.
    pub fn subscribe(&mut self, topic: &str, subscriber: &str) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber.to_string())
    }

    /// Removes `subscriber` from `topic`. Returns `false` if it was absent.
    pub fn unsubscribe(&mut self, topic: &str, subscriber: &str) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.shift_remove(subscriber);
        if subscribers.is_empty() {
            self.topics.shift_remove(topic);
        }
        removed
    }

    /// Subscribes to every topic in `topics`.
    pub fn attach(&mut self, subscriber: &str, topics: &[&str]) {
        for topic in topics {
            self.subscribe(topic, subscriber);
        }
        trace!(subscriber, topics = topics.len(), "attached to bus");
    }

    /// Drops every subscription held by `subscriber`. Returns how many were
    /// removed.
    pub fn detach(&mut self, subscriber: &str) -> usize {
        let mut removed = 0;
        self.topics.retain(|_, subscribers| {
            if subscribers.shift_remove(subscriber) {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        trace!(subscriber, removed, "detached from bus");
        removed
    }

    /// Subscribers of `topic`, in subscription order.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.topics
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `subscriber` holds any subscription.
    #[must_use]
    pub fn is_subscribed(&self, subscriber: &str) -> bool {
        self.topics.values().any(|s| s.contains(subscriber))
    }

    /// Total number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.values().map(IndexSet::len).sum()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut bus = EventBus::new();
        assert!(bus.subscribe("unit.changed", "a"));
        assert!(!bus.subscribe("unit.changed", "a"));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_subscribers_keep_order() {
        let mut bus = EventBus::new();
        bus.subscribe("unit.changed", "b");
        bus.subscribe("unit.changed", "a");
        assert_eq!(bus.subscribers("unit.changed"), vec!["b", "a"]);
        assert!(bus.subscribers("unit.created").is_empty());
    }

    #[test]
    fn test_attach_detach_is_symmetric() {
        let mut bus = EventBus::new();
        let topics = ["unit.created", "unit.changed", "focus.changed"];
        bus.attach("a", &topics);
        bus.attach("b", &topics[..1]);
        assert_eq!(bus.detach("a"), 3);
        assert!(!bus.is_subscribed("a"));
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.detach("b"), 1);
        assert!(bus.is_empty());
        assert_eq!(bus.detach("b"), 0);
    }

    #[test]
    fn test_unsubscribe_drops_empty_topic() {
        let mut bus = EventBus::new();
        bus.subscribe("unit.changed", "a");
        assert!(bus.unsubscribe("unit.changed", "a"));
        assert!(!bus.unsubscribe("unit.changed", "a"));
        assert!(bus.is_empty());
    }
}
