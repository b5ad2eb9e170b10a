//! Status events produced by the engines for the presentation layer.
//!
//! The core only classifies; formatting and coloring belong to the UI.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    PeerJoined,
    PeerLeft,
    MessageReceived,
    ImageReceived,
    Error,
    System,
}

impl EventCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::PeerJoined | Self::PeerLeft => "peer",
            Self::MessageReceived => "message",
            Self::ImageReceived => "image",
            Self::Error => "error",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub category: EventCategory,
    pub text: String,
}

impl Event {
    pub fn new(category: EventCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(EventCategory::System, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(EventCategory::Error, text)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.label(), self.text)
    }
}
