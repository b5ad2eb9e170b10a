//! Exchange engine — one TCP connection per text message or image.
//!
//! A single loop waits on the listener and the command channel together.
//! Each accepted connection and each outbound send runs in its own task,
//! so a slow peer never holds up the loop.

pub mod inbound;
pub mod outbound;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use lanchat_core::{ExchangeCommand, LanchatConfig, WireError};
use lanchat_services::{ContactTable, EventSink, ImageStore, ImageStoreError, ImageViewer};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("receiver refused the image")]
    Rejected,
    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("{} is {actual} bytes, announced {declared}", path.display())]
    SizeMismatch {
        path: PathBuf,
        declared: u64,
        actual: u64,
    },
    #[error("cannot read {0}: {1}")]
    File(PathBuf, std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Store(#[from] ImageStoreError),
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub handle: String,
    pub bind_addr: SocketAddr,
    pub image_dir: PathBuf,
    pub max_image_bytes: u64,
    pub io_timeout: Duration,
}

impl ExchangeSettings {
    pub fn from_config(config: &LanchatConfig) -> Self {
        Self {
            handle: config.identity.handle.clone(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.network.port),
            image_dir: config.exchange.image_dir.clone(),
            max_image_bytes: config.exchange.max_image_bytes,
            io_timeout: config.exchange.io_timeout(),
        }
    }
}

/// State shared by the loop and every per-connection task.
pub struct ExchangeContext {
    pub handle: String,
    pub contacts: ContactTable,
    pub events: EventSink,
    pub store: ImageStore,
    pub viewer: Arc<dyn ImageViewer>,
    pub io_timeout: Duration,
    pub max_image_bytes: u64,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct ExchangeEngine {
    listener: TcpListener,
    ctx: Arc<ExchangeContext>,
    commands: mpsc::UnboundedReceiver<ExchangeCommand>,
    shutdown: broadcast::Receiver<()>,
}

impl ExchangeEngine {
    pub async fn bind(
        settings: ExchangeSettings,
        contacts: ContactTable,
        viewer: Arc<dyn ImageViewer>,
        commands: mpsc::UnboundedReceiver<ExchangeCommand>,
        events: EventSink,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(settings.bind_addr)
            .await
            .with_context(|| format!("failed to bind exchange listener on {}", settings.bind_addr))?;

        let ctx = ExchangeContext {
            handle: settings.handle,
            contacts,
            events,
            store: ImageStore::new(settings.image_dir),
            viewer,
            io_timeout: settings.io_timeout,
            max_image_bytes: settings.max_image_bytes,
        };

        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
            commands,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("exchange listener has no local address")
    }

    pub async fn run(mut self) -> Result<()> {
        let mut commands_open = true;

        tracing::info!(
            addr = %self.listener.local_addr()?,
            image_dir = %self.ctx.store.dir().display(),
            "exchange engine starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("exchange engine shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "connection accepted");
                            tokio::spawn(inbound::serve(Arc::clone(&self.ctx), stream, peer));
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }

                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.dispatch(command),
                        None => {
                            tracing::debug!("exchange command channel closed");
                            commands_open = false;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, command: ExchangeCommand) {
        let recipient = command.recipient();
        let Some(peer) = self.ctx.contacts.get(recipient) else {
            tracing::debug!(recipient, "unknown recipient, command dropped");
            self.ctx
                .events
                .error(format!("recipient unknown: {recipient}"));
            return;
        };
        tracing::debug!(%peer, "dispatching send");
        tokio::spawn(outbound::deliver(Arc::clone(&self.ctx), peer, command));
    }
}
