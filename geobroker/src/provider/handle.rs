//! Handle to one activated provider.
//!
//! The handle owns the transport connection, translates the connection's
//! signal stream into a status watch plus an update broadcast, and exposes
//! timeout-guarded invocation. It never mutates itself outside reacting to
//! transport-delivered events; ref-counting across sessions is the broker's
//! job, not the handle's.
//!
//! # State machine
//!
//! ```text
//! Activating ──► Available ◄──► Unavailable
//!                   │                │
//!                   └──────► Error ◄─┘   (terminal, also on disconnect)
//! ```
//!
//! `Unavailable` is recoverable without re-activation if the transport later
//! reports the remote alive again; `Error` and an explicit `shutdown()` are
//! the only terminal outcomes.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::update::ProviderUpdate;
use crate::catalog::{Capability, CatalogEntry};
use crate::transport::{
    ProviderConnection, ProviderReply, ProviderRequest, ProviderSignal, ProviderTransport,
    RemoteStatus, TransportError,
};

/// Capacity of a handle's update broadcast.
///
/// Location updates are supersede-able; a lagging consumer losing the oldest
/// updates is acceptable.
const UPDATE_CAPACITY: usize = 32;

/// Live status of an activated provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Activation in progress; the remote has not acknowledged readiness.
    Activating,
    /// The provider is serving.
    Available,
    /// Transient: the remote is paused or lost, may recover.
    Unavailable,
    /// Terminal: the provider failed or the transport disconnected.
    Error,
}

impl HandleStatus {
    /// True if the handle is permanently dead.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activating => write!(f, "Activating"),
            Self::Available => write!(f, "Available"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Error => write!(f, "Error"),
        }
    }
}

impl From<RemoteStatus> for HandleStatus {
    fn from(status: RemoteStatus) -> Self {
        match status {
            RemoteStatus::Available => Self::Available,
            RemoteStatus::Unavailable => Self::Unavailable,
            RemoteStatus::Error => Self::Error,
        }
    }
}

/// One activated remote provider.
///
/// Shared across sessions behind an `Arc`; the broker holds the ref-count.
pub struct ProviderHandle {
    entry: CatalogEntry,
    conn: Arc<dyn ProviderConnection>,
    status_rx: watch::Receiver<HandleStatus>,
    updates_tx: broadcast::Sender<ProviderUpdate>,
    last_update: Arc<Mutex<Option<ProviderUpdate>>>,
    shutdown: CancellationToken,
}

impl ProviderHandle {
    /// Activate the provider described by `entry`.
    ///
    /// Connects over the transport and confirms readiness with a
    /// `get_status` round-trip, each guarded by `timeout`. On success the
    /// handle starts in the status the remote reported (normally
    /// `Available`); a remote that reports `Error` during activation fails
    /// activation instead of producing a dead handle.
    pub async fn activate(
        transport: &dyn ProviderTransport,
        entry: CatalogEntry,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        debug!(
            provider_id = %entry.provider_id,
            endpoint = %entry.activation.endpoint,
            "Activating provider"
        );

        let conn = tokio::time::timeout(timeout, transport.connect(&entry.activation))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let conn: Arc<dyn ProviderConnection> = Arc::from(conn);

        // Subscribe before the readiness probe so no signal emitted during
        // activation is lost.
        let signals = conn.signals();

        let reply = tokio::time::timeout(timeout, conn.call(ProviderRequest::GetStatus))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let initial = match reply {
            ProviderReply::Status(RemoteStatus::Error) => {
                conn.close().await;
                return Err(TransportError::Remote(
                    "provider reported error state during activation".into(),
                ));
            }
            ProviderReply::Status(status) => HandleStatus::from(status),
            other => {
                conn.close().await;
                return Err(TransportError::Remote(format!(
                    "unexpected reply to get_status: {:?}",
                    other
                )));
            }
        };

        let (status_tx, status_rx) = watch::channel(initial);
        let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);
        let last_update = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        tokio::spawn(pump_signals(
            entry.provider_id.clone(),
            signals,
            status_tx,
            updates_tx.clone(),
            Arc::clone(&last_update),
            shutdown.clone(),
        ));

        info!(provider_id = %entry.provider_id, status = %initial, "Provider activated");

        Ok(Self {
            entry,
            conn,
            status_rx,
            updates_tx,
            last_update,
            shutdown,
        })
    }

    /// Stable provider identifier.
    pub fn provider_id(&self) -> &str {
        &self.entry.provider_id
    }

    /// The catalog entry this handle was activated from.
    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    /// Current status, non-blocking.
    pub fn status(&self) -> HandleStatus {
        *self.status_rx.borrow()
    }

    /// Watch stream of status changes.
    pub fn status_stream(&self) -> watch::Receiver<HandleStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to the provider's update stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderUpdate> {
        self.updates_tx.subscribe()
    }

    /// Last update the provider reported, if any.
    pub fn last_update(&self) -> Option<ProviderUpdate> {
        self.last_update.lock().expect("handle lock poisoned").clone()
    }

    /// Forward a method call to the provider, guarded by `timeout`.
    ///
    /// Timer expiry maps to [`TransportError::Timeout`]; calls after
    /// shutdown fail with [`TransportError::Unavailable`].
    pub async fn invoke(
        &self,
        request: ProviderRequest,
        timeout: Duration,
    ) -> Result<ProviderReply, TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Unavailable);
        }
        tokio::time::timeout(timeout, self.conn.call(request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Fetch the current value for `capability` and cache it.
    pub async fn get_fix(
        &self,
        capability: Capability,
        timeout: Duration,
    ) -> Result<ProviderUpdate, TransportError> {
        match self.invoke(ProviderRequest::GetFix(capability), timeout).await? {
            ProviderReply::Fix(update) => {
                *self.last_update.lock().expect("handle lock poisoned") = Some(update.clone());
                Ok(update)
            }
            other => Err(TransportError::Remote(format!(
                "unexpected reply to get_fix: {:?}",
                other
            ))),
        }
    }

    /// Signal the remote to release resources. Idempotent.
    ///
    /// After this call the handle delivers no further events; the remote
    /// close runs detached so a slow provider cannot stall the caller.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        debug!(provider_id = %self.entry.provider_id, "Shutting down provider handle");
        let conn = Arc::clone(&self.conn);
        tokio::spawn(async move {
            conn.close().await;
        });
    }

    /// True if `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("provider_id", &self.entry.provider_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Translates transport signals into the status watch and update broadcast.
async fn pump_signals(
    provider_id: String,
    mut signals: broadcast::Receiver<ProviderSignal>,
    status_tx: watch::Sender<HandleStatus>,
    updates_tx: broadcast::Sender<ProviderUpdate>,
    last_update: Arc<Mutex<Option<ProviderUpdate>>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!(provider_id = %provider_id, "Handle signal pump stopped");
                break;
            }

            signal = signals.recv() => {
                match signal {
                    Ok(ProviderSignal::Updated(update)) => {
                        *last_update.lock().expect("handle lock poisoned") = Some(update.clone());
                        // No receivers is fine, the cached value still updates.
                        let _ = updates_tx.send(update);
                    }
                    Ok(ProviderSignal::StatusChanged(status)) => {
                        let status = HandleStatus::from(status);
                        debug!(provider_id = %provider_id, status = %status, "Provider status change");
                        status_tx.send_replace(status);
                        if status.is_terminal() {
                            break;
                        }
                    }
                    Ok(ProviderSignal::Disconnected) => {
                        warn!(provider_id = %provider_id, "Provider transport disconnected");
                        status_tx.send_replace(HandleStatus::Error);
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(provider_id = %provider_id, skipped, "Handle signal pump lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Signal source gone without a disconnect notification.
                        warn!(provider_id = %provider_id, "Provider signal stream closed");
                        status_tx.send_replace(HandleStatus::Error);
                        break;
                    }
                }
            }
        }
    }
}
