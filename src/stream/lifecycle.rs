use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info};

use crate::bus::{BusEvent, SharedBus};

// =============================================================================
// Startable - uniform start/stop for background services
// =============================================================================

/// Services with a background task (listener session, status watcher).
/// Lets the binary's unload path stop everything through one codepath.
#[async_trait]
pub trait Startable: Send + Sync {
    /// Service name for logs (e.g., "listener", "watcher")
    fn name(&self) -> &'static str;

    /// Start the service. No-op if already running.
    async fn start(&self) -> Result<()>;

    /// Stop the service and run its cleanup.
    async fn stop(&self);

    /// Whether the service has what it needs to start.
    async fn can_start(&self) -> bool {
        true
    }
}

/// Implement [`Startable`] by delegating to `start_internal`/`stop_internal`.
///
/// ```ignore
/// impl_startable!(StreamWatcher, "watcher");
/// impl_startable!(ListenerSession, "listener", has_room);  // custom can_start
/// ```
#[macro_export]
macro_rules! impl_startable {
    ($service:ty, $name:literal, $can_start:ident) => {
        #[async_trait::async_trait]
        impl $crate::stream::Startable for $service {
            fn name(&self) -> &'static str {
                $name
            }

            async fn start(&self) -> anyhow::Result<()> {
                self.start_internal().await
            }

            async fn stop(&self) {
                self.stop_internal().await
            }

            async fn can_start(&self) -> bool {
                self.$can_start().await
            }
        }
    };
    ($service:ty, $name:literal) => {
        #[async_trait::async_trait]
        impl $crate::stream::Startable for $service {
            fn name(&self) -> &'static str {
                $name
            }

            async fn start(&self) -> anyhow::Result<()> {
                self.start_internal().await
            }

            async fn stop(&self) {
                self.stop_internal().await
            }
        }
    };
}

/// Unload path: announce shutdown on the bus, then stop every service
/// concurrently.
pub async fn stop_all(bus: &SharedBus, services: &[Arc<dyn Startable>], reason: Option<String>) {
    bus.publish(BusEvent::ShuttingDown { reason });
    join_all(services.iter().map(|service| async move {
        service.stop().await;
        debug!("Stopped {}", service.name());
    }))
    .await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
