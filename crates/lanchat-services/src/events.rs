//! Event channel between the engines and the presentation layer.

use lanchat_core::{Event, EventCategory};
use tokio::sync::mpsc;

/// Producer half of the status event channel. Cheap to clone; sending
/// never blocks.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

/// Create an unbounded event channel.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped, discarding event");
        }
    }

    pub fn send(&self, category: EventCategory, text: impl Into<String>) {
        self.emit(Event::new(category, text));
    }

    pub fn system(&self, text: impl Into<String>) {
        self.emit(Event::system(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(Event::error(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = event_channel();
        sink.system("one");
        sink.error("two");
        sink.send(EventCategory::PeerJoined, "three");

        assert_eq!(rx.try_recv().unwrap(), Event::system("one"));
        assert_eq!(rx.try_recv().unwrap(), Event::error("two"));
        assert_eq!(
            rx.try_recv().unwrap().category,
            EventCategory::PeerJoined
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emitting_after_receiver_drop_is_harmless() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.system("nobody listening");
    }
}
