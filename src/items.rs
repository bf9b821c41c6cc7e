//! Items that contribute topics to the network layer
//!
//! Controls, scripts and displays have nothing in common except that they declare topics.
//! Each declares its topics relative to its own category; the network facade adds the
//! `brickmaster2/<system>/<category>/` prefix and decides where inbound messages go based on
//! the [`RegisteredItem`] tag.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

/// A topic declared by an item, relative to the item's category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicDecl {
    Inbound {
        suffix: String,
    },
    Outbound {
        suffix: String,
        retain: bool,
        repeat: bool,
        /// Passed back to [`TopicItem::read`] to obtain the current value.
        key: String,
    },
}

impl TopicDecl {
    pub fn inbound(suffix: impl Into<String>) -> Self {
        TopicDecl::Inbound {
            suffix: suffix.into(),
        }
    }

    pub fn outbound(suffix: impl Into<String>, retain: bool, repeat: bool, key: &str) -> Self {
        TopicDecl::Outbound {
            suffix: suffix.into(),
            retain,
            repeat,
            key: key.to_string(),
        }
    }
}

pub trait TopicItem {
    fn id(&self) -> &str;

    /// Human readable name, defaults to the id.
    fn name(&self) -> &str {
        self.id()
    }

    fn topics(&self) -> Vec<TopicDecl>;

    /// Current wire value for an outbound key, `None` if unavailable.
    fn read(&self, key: &str) -> Option<String>;

    fn on_message(&mut self, topic: &str, payload: &str) {
        debug!(
            "Item '{}' ignores message on {}: {}",
            self.id(),
            topic,
            payload
        );
    }
}

pub type SharedItem = Rc<RefCell<dyn TopicItem>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Controls,
    Scripts,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Controls => "controls",
            Category::Scripts => "scripts",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of item kinds the network layer accepts.
pub enum RegisteredItem {
    Control(SharedItem),
    Script(SharedItem),
    Display(SharedItem),
}

impl RegisteredItem {
    pub fn category(&self) -> Category {
        match self {
            RegisteredItem::Control(_) | RegisteredItem::Display(_) => Category::Controls,
            RegisteredItem::Script(_) => Category::Scripts,
        }
    }

    pub fn item(&self) -> &SharedItem {
        match self {
            RegisteredItem::Control(item)
            | RegisteredItem::Script(item)
            | RegisteredItem::Display(item) => item,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegisteredItem::Control(_) => "control",
            RegisteredItem::Script(_) => "script",
            RegisteredItem::Display(_) => "display",
        }
    }
}
