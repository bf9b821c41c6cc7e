//! Topic tables for outbound state and inbound commands
//!
//! Pure data: nothing in here touches the network. Outbound entries are keyed by a name that
//! stays stable across the process (`connectivity`, `controls/light1/status`, ...) and carry the
//! last value that was handed to the transport. Inbound entries map a fully-qualified topic to
//! the closure that should receive it.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

/// Produces the current wire value of an outbound topic. `None` means the value could not be
/// read this tick (for example the backing item is gone).
pub type ValueSource = Box<dyn Fn() -> Option<String>>;

/// Receives `(topic, payload)` for an inbound topic.
pub type InboundCallback = Box<dyn FnMut(&str, &str)>;

pub struct OutboundEntry {
    pub topic: String,
    pub retain: bool,
    pub repeat: bool,
    previous: Option<String>,
    source: ValueSource,
}

impl fmt::Debug for OutboundEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundEntry")
            .field("topic", &self.topic)
            .field("retain", &self.retain)
            .field("repeat", &self.repeat)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

impl OutboundEntry {
    pub fn new(topic: impl Into<String>, retain: bool, repeat: bool, source: ValueSource) -> Self {
        Self {
            topic: topic.into(),
            retain,
            repeat,
            previous: None,
            source,
        }
    }

    pub fn read(&self) -> Option<String> {
        (self.source)()
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn needs_publish(&self, value: &str) -> bool {
        self.repeat || self.previous.as_deref() != Some(value)
    }

    pub fn mark_published(&mut self, value: String) {
        self.previous = Some(value);
    }
}

#[derive(Default)]
pub struct TopicRegistry {
    outbound: BTreeMap<String, OutboundEntry>,
    inbound: BTreeMap<String, InboundCallback>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the outbound entry called `name`.
    pub fn register_outbound(&mut self, name: impl Into<String>, entry: OutboundEntry) {
        let name = name.into();
        debug!("Registering outbound '{}' -> {}", name, entry.topic);
        if self.outbound.insert(name.clone(), entry).is_some() {
            debug!("Outbound '{}' replaced by a later registration", name);
        }
    }

    /// Inserts the callback for `topic`. A second registration for the same topic replaces the
    /// first; that usually means two items claim one topic, so it is logged loudly.
    pub fn register_inbound(&mut self, topic: impl Into<String>, callback: InboundCallback) {
        let topic = topic.into();
        debug!("Adding callback for topic: {}", topic);
        if self.inbound.insert(topic.clone(), callback).is_some() {
            warn!(
                "Topic {} was already registered; the earlier callback is replaced",
                topic
            );
        }
    }

    pub fn inbound_topics(&self) -> impl Iterator<Item = &str> {
        self.inbound.keys().map(String::as_str)
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn callback_mut(&mut self, topic: &str) -> Option<&mut InboundCallback> {
        self.inbound.get_mut(topic)
    }

    pub fn outbound(&self, name: &str) -> Option<&OutboundEntry> {
        self.outbound.get(name)
    }

    pub fn outbound_mut(&mut self) -> impl Iterator<Item = (&String, &mut OutboundEntry)> {
        self.outbound.iter_mut()
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Records a value published outside the scheduler (e.g. `online` on connect).
    pub fn mark_published(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.outbound.get_mut(name) {
            entry.mark_published(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn constant(value: &'static str) -> ValueSource {
        Box::new(move || Some(value.to_string()))
    }

    #[test]
    fn outbound_registration_is_last_writer_wins() {
        let mut registry = TopicRegistry::new();
        registry.register_outbound("status", OutboundEntry::new("a/status", true, false, constant("1")));
        registry.register_outbound("status", OutboundEntry::new("b/status", false, true, constant("2")));

        assert_eq!(registry.outbound_count(), 1);
        let entry = registry.outbound("status").unwrap();
        assert_eq!(entry.topic, "b/status");
        assert_eq!(entry.read().as_deref(), Some("2"));
    }

    #[test]
    fn duplicate_inbound_topic_keeps_latest_callback() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TopicRegistry::new();

        let first = hits.clone();
        registry.register_inbound("x/set", Box::new(move |_, _| first.borrow_mut().push("first")));
        let second = hits.clone();
        registry.register_inbound("x/set", Box::new(move |_, _| second.borrow_mut().push("second")));

        (registry.callback_mut("x/set").unwrap())("x/set", "on");

        assert_eq!(registry.inbound_count(), 1);
        assert_eq!(*hits.borrow(), vec!["second"]);
    }

    #[test]
    fn needs_publish_tracks_previous_value() {
        let mut entry = OutboundEntry::new("t", false, false, constant("OFF"));
        assert!(entry.needs_publish("OFF"));
        entry.mark_published("OFF".to_string());
        assert!(!entry.needs_publish("OFF"));
        assert!(entry.needs_publish("ON"));

        let mut repeating = OutboundEntry::new("t", false, true, constant("OFF"));
        repeating.mark_published("OFF".to_string());
        assert!(repeating.needs_publish("OFF"));
    }
}
