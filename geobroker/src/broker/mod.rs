//! The master broker: session orchestration over providers.
//!
//! The broker is a single sequential actor that owns the session map and
//! the provider-handle map. All mutations flow through its command and
//! event channels, so selection, binding and failure recovery never
//! interleave inconsistently. Slow work (provider activation, method
//! calls) runs in spawned worker tasks that report back via events; the
//! actor itself never awaits a provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        LocationBroker                           │
//! │                                                                 │
//! │  ┌──────────────┐   BrokerCommand   ┌──────────────────────┐    │
//! │  │ BrokerClient │ ────────────────► │     BrokerActor      │    │
//! │  │ (clients)    │    channel        │  sessions / handles  │    │
//! │  └──────────────┘                   └──────────┬───────────┘    │
//! │                                                │ BrokerEvent    │
//! │        activation workers, handle pumps,       │ channel        │
//! │        grace timers, connectivity monitor  ────┘                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. **Creation**: [`LocationBroker::start`] spawns the actor task
//! 2. **Operation**: clients use [`BrokerClient`] to open sessions,
//!    query values and subscribe to updates
//! 3. **Shutdown**: [`LocationBroker::shutdown`] cancels the actor and
//!    waits for it to release every provider handle

mod actor;
mod client;
mod error;
mod session;

pub use client::BrokerClient;
pub use error::BrokerError;
pub use session::{SessionId, SessionStatus};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::ProviderCatalog;
use crate::config::BrokerSettings;
use crate::connectivity::ConnectivityMonitor;
use crate::transport::ProviderTransport;

use actor::BrokerActor;

/// One process-wide broker with explicit lifecycle.
///
/// Owns the actor task; clients talk to it through cloneable
/// [`BrokerClient`] handles.
pub struct LocationBroker {
    client: BrokerClient,
    actor_handle: Option<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl LocationBroker {
    /// Start the broker actor in a background task.
    pub fn start(
        catalog: Arc<dyn ProviderCatalog>,
        transport: Arc<dyn ProviderTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        settings: BrokerSettings,
    ) -> Self {
        info!("Starting location broker");

        let (command_tx, command_rx) = mpsc::channel(settings.command_channel_capacity);
        let actor = BrokerActor::new(catalog, transport, connectivity, settings);

        let shutdown_token = CancellationToken::new();
        let actor_shutdown = shutdown_token.clone();
        let actor_handle = Some(tokio::spawn(async move {
            actor.run(command_rx, actor_shutdown).await;
        }));

        Self {
            client: BrokerClient::new(command_tx),
            actor_handle,
            shutdown_token,
        }
    }

    /// Get a client for opening sessions.
    ///
    /// Clients are cheap to clone and can be shared across tasks.
    pub fn client(&self) -> BrokerClient {
        self.client.clone()
    }

    /// Check if the broker actor is still running.
    pub fn is_running(&self) -> bool {
        self.client.is_connected()
    }

    /// Shut the broker down gracefully.
    ///
    /// Cancels the actor and waits for it to release all provider handles.
    pub async fn shutdown(mut self) {
        info!("Shutting down location broker");
        self.shutdown_token.cancel();
        if let Some(handle) = self.actor_handle.take() {
            match handle.await {
                Ok(()) => info!("Broker actor shut down cleanly"),
                Err(e) => tracing::error!("Broker actor task panicked: {}", e),
            }
        }
    }
}
