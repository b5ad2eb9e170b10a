//! lanchatd — LAN chat peer: UDP discovery, TCP text and image exchange.

pub mod control;
pub mod discovery;
pub mod exchange;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use lanchat_core::LanchatConfig;
use lanchat_services::{event_channel, ContactTable, ImageViewer, NoViewer, PlatformViewer};

use control::{ControlExit, LocalIdentity};
use discovery::{DiscoveryEngine, DiscoverySettings};
use exchange::{ExchangeEngine, ExchangeSettings};

/// How long shutdown waits for the discovery engine to send LEAVE.
const LEAVE_GRACE: Duration = Duration::from_secs(1);

/// Run a full node with the stdin control surface until Ctrl-C, `quit`,
/// or an engine exits. Closing stdin only disables the control surface.
pub async fn run(config: LanchatConfig) -> Result<()> {
    let contacts = ContactTable::new();
    let (events, event_rx) = event_channel();
    let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
    let (exchange_tx, exchange_rx) = mpsc::unbounded_channel();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Engines ──────────────────────────────────────────────────────────────
    let viewer: Arc<dyn ImageViewer> = if config.exchange.open_images {
        Arc::new(PlatformViewer)
    } else {
        Arc::new(NoViewer)
    };

    let exchange = ExchangeEngine::bind(
        ExchangeSettings::from_config(&config),
        contacts.clone(),
        viewer,
        exchange_rx,
        events.clone(),
        shutdown_tx.subscribe(),
    )
    .await?;

    let discovery = DiscoveryEngine::bind(
        DiscoverySettings::from_config(&config),
        contacts.clone(),
        discovery_rx,
        events.clone(),
        shutdown_tx.subscribe(),
    )?;

    let mut discovery_task = tokio::spawn(discovery.run());
    let mut exchange_task = tokio::spawn(exchange.run());
    let printer_task = tokio::spawn(control::print_events(event_rx));
    let mut control_task = tokio::spawn(control::stdin_loop(
        LocalIdentity {
            handle: config.identity.handle.clone(),
            port: config.network.port,
        },
        discovery_tx,
        exchange_tx,
        events,
    ));

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    let control_done = async {
        match (&mut control_task).await {
            Ok(Ok(ControlExit::InputClosed)) => {
                tracing::info!("stdin closed, running until Ctrl-C");
                std::future::pending::<()>().await;
            }
            r => tracing::info!("control surface exited: {:?}", r),
        }
    };

    tokio::select! {
        _ = shutdown_rx.recv()   => tracing::info!("shutting down"),
        _ = control_done         => {}
        r = &mut discovery_task  => tracing::error!("discovery engine exited: {:?}", r),
        r = &mut exchange_task   => tracing::error!("exchange engine exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    if !discovery_task.is_finished() {
        match tokio::time::timeout(LEAVE_GRACE, discovery_task).await {
            Ok(r) => tracing::debug!("discovery engine stopped: {:?}", r),
            Err(_) => tracing::warn!("discovery engine did not stop in time"),
        }
    }
    control_task.abort();
    drop(printer_task);

    Ok(())
}
