//! Discovery engine.
//!
//! Owns the UDP discovery socket and drives [`DiscoveryState`]: one loop
//! multiplexes inbound datagrams, UI commands, the reconciliation deadline
//! and shutdown. Protocol decisions live in `protocol`; this module only
//! performs the resulting actions.

pub mod protocol;
pub mod socket;
pub mod window;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use lanchat_core::wire::MAX_DATAGRAM_SIZE;
use lanchat_core::{DiscoveryCommand, DiscoveryMessage, LanchatConfig, PeerRecord};
use lanchat_services::{ContactTable, EventSink};

pub use protocol::{Action, BurstPolicy, DiscoveryState};

/// Everything the discovery engine needs to know about the local node.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub handle: String,
    /// TCP port advertised in JOIN.
    pub exchange_port: u16,
    /// Address recorded for ourselves and returned in SEEN.
    pub advertise_addr: IpAddr,
    pub bind_addr: SocketAddr,
    pub broadcast_addr: SocketAddr,
    pub burst: BurstPolicy,
    pub settle: Duration,
}

impl DiscoverySettings {
    pub fn from_config(config: &LanchatConfig) -> Self {
        let network = &config.network;
        Self {
            handle: config.identity.handle.clone(),
            exchange_port: network.port,
            advertise_addr: network
                .advertise_addr
                .unwrap_or_else(socket::probe_local_ip),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), network.discovery_port),
            broadcast_addr: SocketAddr::new(network.broadcast_addr, network.discovery_port),
            burst: BurstPolicy {
                count: config.discovery.burst_count,
                interval: config.discovery.burst_interval(),
            },
            settle: config.discovery.settle(),
        }
    }
}

pub struct DiscoveryEngine {
    socket: Arc<UdpSocket>,
    state: DiscoveryState,
    broadcast_addr: SocketAddr,
    burst: BurstPolicy,
    commands: mpsc::UnboundedReceiver<DiscoveryCommand>,
    events: EventSink,
    shutdown: broadcast::Receiver<()>,
}

impl DiscoveryEngine {
    /// Bind the discovery socket. Must be called inside a tokio runtime.
    pub fn bind(
        settings: DiscoverySettings,
        contacts: ContactTable,
        commands: mpsc::UnboundedReceiver<DiscoveryCommand>,
        events: EventSink,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let socket = socket::make_discovery_socket(settings.bind_addr)
            .context("failed to create discovery socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        let local = PeerRecord::new(
            settings.handle,
            settings.advertise_addr,
            settings.exchange_port,
        );

        Ok(Self {
            socket: Arc::new(socket),
            state: DiscoveryState::new(local, contacts, settings.burst, settings.settle),
            broadcast_addr: settings.broadcast_addr,
            burst: settings.burst,
            commands,
            events,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("discovery socket has no local address")
    }

    /// Redirect broadcasts, e.g. to a single peer on loopback.
    pub fn set_broadcast_addr(&mut self, addr: SocketAddr) {
        self.broadcast_addr = addr;
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut commands_open = true;

        tracing::info!(
            handle = %self.state.local().name,
            addr = %self.state.local().addr,
            exchange_port = self.state.local().port,
            broadcast = %self.broadcast_addr,
            "discovery engine starting"
        );

        let actions = self.state.startup();
        self.execute(actions).await;

        loop {
            let deadline = self.state.next_deadline();
            let window_timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("discovery engine shutting down");
                    let actions = self.state.shutdown();
                    self.execute(actions).await;
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    match DiscoveryMessage::decode(&buf[..len]) {
                        Ok(message) => {
                            tracing::trace!(%from, keyword = message.keyword(), "datagram");
                            let actions = self.state.on_message(message, from, Instant::now());
                            self.execute(actions).await;
                        }
                        Err(e) => {
                            tracing::debug!(%from, error = %e, "discarding discovery datagram");
                        }
                    }
                }

                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => {
                            tracing::debug!(%command, "discovery command");
                            let actions = self.state.on_command(command, Instant::now());
                            self.execute(actions).await;
                        }
                        None => {
                            tracing::debug!("discovery command channel closed");
                            commands_open = false;
                        }
                    }
                }

                _ = window_timer => {}
            }

            let actions = self.state.on_tick(Instant::now());
            self.execute(actions).await;
        }
    }

    async fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(message) => {
                    self.send(&message, self.broadcast_addr).await;
                }
                Action::Unicast(to, message) => {
                    self.send(&message, to).await;
                }
                Action::WhoBurst => {
                    tokio::spawn(redundant_broadcast(
                        Arc::clone(&self.socket),
                        self.broadcast_addr,
                        DiscoveryMessage::Who,
                        self.burst,
                    ));
                }
                Action::Emit(event) => self.events.emit(event),
            }
        }
    }

    async fn send(&self, message: &DiscoveryMessage, to: SocketAddr) {
        match self.socket.send_to(&message.to_bytes(), to).await {
            Ok(n) => tracing::trace!(%to, bytes = n, keyword = message.keyword(), "sent"),
            Err(e) => tracing::warn!(%to, error = %e, keyword = message.keyword(), "send failed"),
        }
    }
}

/// Send `message` to `target` `policy.count` times, `policy.interval` apart.
pub async fn redundant_broadcast(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    message: DiscoveryMessage,
    policy: BurstPolicy,
) {
    let payload = message.to_bytes();
    for i in 0..policy.count {
        if i > 0 {
            tokio::time::sleep(policy.interval).await;
        }
        if let Err(e) = socket.send_to(&payload, target).await {
            tracing::warn!(%target, error = %e, attempt = i + 1, "burst send failed");
        }
    }
    tracing::trace!(%target, count = policy.count, keyword = message.keyword(), "burst complete");
}
