//! Discovery protocol state machine.
//!
//! Pure with respect to I/O: every input (datagram, command, clock tick)
//! mutates the contact table and the reconciliation window, and returns
//! the [`Action`]s the engine must carry out on the socket and the event
//! channel. Time is passed in, so the whole protocol is testable without
//! sockets or sleeps.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lanchat_core::{DiscoveryCommand, DiscoveryMessage, Event, EventCategory, PeerRecord};
use lanchat_services::ContactTable;

use super::window::SeenWindow;

/// Redundant broadcast policy for WHO. Repetition only improves the odds
/// that every peer sees one copy; duplicates are harmless because every
/// receiver upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstPolicy {
    pub count: u32,
    pub interval: Duration,
}

impl BurstPolicy {
    /// Time from the first to the last copy of a burst.
    pub fn span(&self) -> Duration {
        self.interval * self.count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Broadcast(DiscoveryMessage),
    Unicast(SocketAddr, DiscoveryMessage),
    /// Broadcast WHO according to the [`BurstPolicy`].
    WhoBurst,
    Emit(Event),
}

pub struct DiscoveryState {
    local: PeerRecord,
    contacts: ContactTable,
    window: SeenWindow,
    burst: BurstPolicy,
    /// Peers whose own JOIN we have seen. Peers known only from SEEN
    /// hearsay are not in here yet.
    announced: HashSet<String>,
}

impl DiscoveryState {
    pub fn new(
        local: PeerRecord,
        contacts: ContactTable,
        burst: BurstPolicy,
        settle: Duration,
    ) -> Self {
        Self {
            local,
            contacts,
            window: SeenWindow::new(settle),
            burst,
            announced: HashSet::new(),
        }
    }

    pub fn local(&self) -> &PeerRecord {
        &self.local
    }

    fn own_join(&self) -> DiscoveryMessage {
        DiscoveryMessage::join(&self.local.name, self.local.port)
    }

    /// Seed the table with ourselves and announce.
    pub fn startup(&mut self) -> Vec<Action> {
        self.contacts.upsert(self.local.clone());
        vec![
            Action::Emit(Event::system(format!(
                "own address {}:{}",
                self.local.addr, self.local.port
            ))),
            Action::Broadcast(self.own_join()),
            Action::WhoBurst,
        ]
    }

    /// Handle one decoded datagram received from `from`.
    pub fn on_message(
        &mut self,
        message: DiscoveryMessage,
        from: SocketAddr,
        now: Instant,
    ) -> Vec<Action> {
        match message {
            DiscoveryMessage::Join { name, port } => self.on_join(name, port, from),
            DiscoveryMessage::Who => {
                vec![Action::Unicast(
                    from,
                    DiscoveryMessage::seen(self.contacts.snapshot()),
                )]
            }
            DiscoveryMessage::Leave { name } => self.on_leave(&name),
            DiscoveryMessage::Seen { entries, skipped } => {
                if skipped > 0 {
                    tracing::warn!(%from, skipped, "SEEN contained malformed entries");
                }
                self.on_seen(entries, now)
            }
        }
    }

    fn on_join(&mut self, name: String, port: u16, from: SocketAddr) -> Vec<Action> {
        if name == self.local.name {
            tracing::trace!("ignoring own JOIN");
            return Vec::new();
        }

        let record = PeerRecord::new(name, from.ip(), port);
        let previous = self.contacts.upsert(record.clone());
        let first_join = self.announced.insert(record.name.clone());
        if previous.as_ref() == Some(&record) && !first_join {
            // Already joined at this endpoint: this is the answer to our own
            // announce, replying again would ping-pong forever.
            tracing::trace!(peer = %record.name, "JOIN from known peer");
            return Vec::new();
        }

        tracing::info!(peer = %record.name, addr = %from.ip(), port, "peer joined");
        vec![
            Action::Unicast(from, self.own_join()),
            Action::Emit(Event::new(
                EventCategory::PeerJoined,
                format!("{} joined the chat", record.name),
            )),
            Action::WhoBurst,
        ]
    }

    fn on_leave(&mut self, name: &str) -> Vec<Action> {
        if name == self.local.name {
            tracing::trace!("ignoring own LEAVE");
            return Vec::new();
        }
        self.announced.remove(name);
        match self.contacts.remove(name) {
            Some(_) => {
                tracing::info!(peer = name, "peer left");
                vec![Action::Emit(Event::new(
                    EventCategory::PeerLeft,
                    format!("{name} left the chat"),
                ))]
            }
            None => Vec::new(),
        }
    }

    fn on_seen(&mut self, entries: Vec<PeerRecord>, now: Instant) -> Vec<Action> {
        let entries: Vec<PeerRecord> = entries
            .into_iter()
            .filter(|e| e.name != self.local.name)
            .collect();

        for entry in &entries {
            self.contacts.upsert(entry.clone());
        }
        let buffered = self.window.record(&entries, now);
        tracing::debug!(count = entries.len(), buffered, "SEEN applied");
        Vec::new()
    }

    /// Handle one command from the control surface.
    pub fn on_command(&mut self, command: DiscoveryCommand, now: Instant) -> Vec<Action> {
        match command {
            DiscoveryCommand::Who => {
                self.window.open(now, self.burst.span());
                vec![
                    Action::WhoBurst,
                    Action::Emit(Event::system("WHO broadcast sent")),
                ]
            }
            DiscoveryCommand::Join { name, port } => vec![
                Action::Broadcast(DiscoveryMessage::join(name, port)),
                Action::WhoBurst,
                Action::Emit(Event::system("JOIN sent")),
            ],
            DiscoveryCommand::Leave { name } => vec![
                Action::Broadcast(DiscoveryMessage::leave(name)),
                Action::Emit(Event::system("LEAVE sent")),
            ],
            DiscoveryCommand::Peers => self.peer_listing(),
        }
    }

    /// Own record first, marked, then every other peer by name.
    fn peer_listing(&self) -> Vec<Action> {
        let others: Vec<PeerRecord> = self
            .contacts
            .snapshot()
            .into_iter()
            .filter(|r| r.name != self.local.name)
            .collect();

        let mut actions = vec![Action::Emit(Event::system(format!(
            " - {} (you)",
            self.local
        )))];
        if others.is_empty() {
            actions.push(Action::Emit(Event::system("no other peers found")));
            return actions;
        }

        actions.insert(
            0,
            Action::Emit(Event::system(format!("{} known peer(s):", others.len()))),
        );
        actions.extend(
            others
                .iter()
                .map(|r| Action::Emit(Event::system(format!(" - {r}")))),
        );
        actions
    }

    /// Commit the reconciliation window if its deadline has passed.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Action> {
        let Some(entries) = self.window.poll_commit(now) else {
            return Vec::new();
        };
        for entry in &entries {
            self.contacts.upsert(entry.clone());
        }
        tracing::debug!(count = entries.len(), "WHO round committed");
        vec![Action::Emit(Event::system(format!(
            "peer list updated ({} peer(s) answered)",
            entries.len()
        )))]
    }

    /// When the engine next needs a tick, if at all.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.window.deadline()
    }

    /// Announce departure.
    pub fn shutdown(&self) -> Vec<Action> {
        vec![Action::Broadcast(DiscoveryMessage::leave(&self.local.name))]
    }
}
