//! Routes inbound messages to the callback registered for their exact topic.

use tracing::{debug, trace};

use super::message::InboundMessage;
use super::registry::TopicRegistry;

/// Invokes the callback registered for `message.topic`. Returns `false` when nothing is
/// registered; the message is dropped.
pub fn route(registry: &mut TopicRegistry, message: &InboundMessage) -> bool {
    match registry.callback_mut(&message.topic) {
        Some(callback) => {
            trace!("Routing {}", message);
            callback(&message.topic, &message.payload);
            true
        }
        None => {
            debug!(
                "Received message on unregistered topic {}: {}",
                message.topic,
                message.preview()
            );
            false
        }
    }
}
