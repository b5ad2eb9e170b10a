//! WHO reconciliation window.
//!
//! Replies to a broadcast WHO arrive from an unknown number of peers in no
//! particular order. While a window is open every SEEN is buffered and
//! pushes the deadline out; the buffer is committed once the deadline
//! passes with no further replies.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lanchat_core::PeerRecord;

#[derive(Debug)]
pub struct SeenWindow {
    settle: Duration,
    open: Option<OpenWindow>,
}

#[derive(Debug)]
struct OpenWindow {
    buffer: HashMap<String, PeerRecord>,
    deadline: Instant,
}

impl SeenWindow {
    pub fn new(settle: Duration) -> Self {
        Self { settle, open: None }
    }

    /// Open the window, or restart it if one is already open. `lead` is the
    /// time still needed to finish sending the WHO burst.
    pub fn open(&mut self, now: Instant, lead: Duration) {
        self.open = Some(OpenWindow {
            buffer: HashMap::new(),
            deadline: now + lead + self.settle,
        });
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.open.as_ref().map(|w| w.deadline)
    }

    /// Buffer the entries of one SEEN reply. Returns false when no window
    /// is open.
    pub fn record<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a PeerRecord>,
        now: Instant,
    ) -> bool {
        let Some(window) = self.open.as_mut() else {
            return false;
        };
        for entry in entries {
            window.buffer.insert(entry.name.clone(), entry.clone());
        }
        window.deadline = window.deadline.max(now + self.settle);
        true
    }

    /// Close the window and hand back its buffer once the deadline has
    /// passed.
    pub fn poll_commit(&mut self, now: Instant) -> Option<Vec<PeerRecord>> {
        if now < self.open.as_ref()?.deadline {
            return None;
        }
        let window = self.open.take()?;
        let mut entries: Vec<PeerRecord> = window.buffer.into_values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Some(entries)
    }
}
