//! lanchat integration test harness.
//!
//! Every test runs real peers in-process on loopback. Each peer binds
//! ephemeral ports, and its "broadcast" address is pointed at the other
//! peer's discovery socket, so no LAN or privileges are required.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use lanchat_core::{DiscoveryCommand, Event, EventCategory, ExchangeCommand};
use lanchat_services::{event_channel, ContactTable, NoViewer};
use lanchatd::discovery::{BurstPolicy, DiscoveryEngine, DiscoverySettings};
use lanchatd::exchange::{ExchangeEngine, ExchangeSettings};

mod discovery;
mod exchange;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const WAIT: Duration = Duration::from_secs(5);
pub const SETTLE: Duration = Duration::from_millis(150);

pub struct TestPeer {
    pub name: String,
    pub contacts: ContactTable,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub discovery_tx: mpsc::UnboundedSender<DiscoveryCommand>,
    pub exchange_tx: mpsc::UnboundedSender<ExchangeCommand>,
    pub discovery_addr: SocketAddr,
    pub exchange_addr: SocketAddr,
    pub image_dir: PathBuf,
    shutdown: broadcast::Sender<()>,
    discovery: Option<DiscoveryEngine>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl TestPeer {
    /// Bind both engines on loopback without starting them.
    pub async fn bind(name: &str) -> Result<Self> {
        let contacts = ContactTable::new();
        let (events, event_rx) = event_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (exchange_tx, exchange_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);
        let image_dir = std::env::temp_dir().join(format!(
            "lanchat-it-{name}-{}-{}",
            std::process::id(),
            unique()
        ));

        let exchange = ExchangeEngine::bind(
            ExchangeSettings {
                handle: name.to_string(),
                bind_addr: SocketAddr::new(LOOPBACK, 0),
                image_dir: image_dir.clone(),
                max_image_bytes: 1024 * 1024,
                io_timeout: Duration::from_secs(2),
            },
            contacts.clone(),
            Arc::new(NoViewer),
            exchange_rx,
            events.clone(),
            shutdown.subscribe(),
        )
        .await?;
        let exchange_addr = exchange.local_addr()?;

        let discovery = DiscoveryEngine::bind(
            DiscoverySettings {
                handle: name.to_string(),
                exchange_port: exchange_addr.port(),
                advertise_addr: LOOPBACK,
                bind_addr: SocketAddr::new(LOOPBACK, 0),
                // Replaced by `point_at` before start.
                broadcast_addr: SocketAddr::new(LOOPBACK, 9),
                burst: BurstPolicy {
                    count: 3,
                    interval: Duration::from_millis(20),
                },
                settle: SETTLE,
            },
            contacts.clone(),
            discovery_rx,
            events,
            shutdown.subscribe(),
        )?;
        let discovery_addr = discovery.local_addr()?;

        let tasks = vec![tokio::spawn(exchange.run())];

        Ok(Self {
            name: name.to_string(),
            contacts,
            events: event_rx,
            discovery_tx,
            exchange_tx,
            discovery_addr,
            exchange_addr,
            image_dir,
            shutdown,
            discovery: Some(discovery),
            tasks,
        })
    }

    /// Send this peer's broadcasts to `other` only.
    pub fn point_at(&mut self, other: &TestPeer) {
        self.point_at_addr(other.discovery_addr);
    }

    /// Send this peer's broadcasts to an arbitrary socket.
    pub fn point_at_addr(&mut self, addr: SocketAddr) {
        if let Some(engine) = self.discovery.as_mut() {
            engine.set_broadcast_addr(addr);
        }
    }

    /// Start the discovery engine (JOIN + WHO burst go out immediately).
    pub fn start(&mut self) {
        if let Some(engine) = self.discovery.take() {
            self.tasks.push(tokio::spawn(engine.run()));
        }
    }

    /// The record other peers should hold for this one.
    pub fn record(&self) -> lanchat_core::PeerRecord {
        lanchat_core::PeerRecord::new(&self.name, LOOPBACK, self.exchange_addr.port())
    }

    /// Wait for the next event of `category`, skipping others.
    pub async fn expect_event(&mut self, category: EventCategory) -> Event {
        let name = self.name.clone();
        let events = &mut self.events;
        let wait = async {
            loop {
                match events.recv().await {
                    Some(event) if event.category == category => return event,
                    Some(_) => continue,
                    None => panic!("{name}: event channel closed"),
                }
            }
        };
        let result = tokio::time::timeout(WAIT, wait).await;
        result.unwrap_or_else(|_| panic!("{name}: no {category:?} event within {WAIT:?}"))
    }

    /// Wait for a system event whose text starts with `prefix`.
    pub async fn expect_system(&mut self, prefix: &str) -> Event {
        loop {
            let event = self.expect_event(EventCategory::System).await;
            if event.text.starts_with(prefix) {
                return event;
            }
        }
    }

    /// Everything emitted during the next `quiet` period.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<Event> {
        tokio::time::sleep(quiet).await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stop both engines and wait for them; discovery announces LEAVE.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(WAIT, task).await;
        }
        let _ = std::fs::remove_dir_all(&self.image_dir);
    }
}

/// Two started peers that broadcast to each other.
pub async fn start_pair(a: &str, b: &str) -> Result<(TestPeer, TestPeer)> {
    let mut first = TestPeer::bind(a).await?;
    let mut second = TestPeer::bind(b).await?;
    first.point_at(&second);
    second.point_at(&first);
    second.start();
    first.start();
    Ok((first, second))
}

/// Poll `check` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn unique() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
