//! Opaque transport boundary between the broker and provider processes.
//!
//! The transport that carries remote calls and signals is an external
//! collaborator; the broker only relies on three primitives: method call
//! with request/reply semantics, in-order signal delivery per source, and
//! disconnect notification. This module defines the object-safe traits for
//! that boundary plus the typed request/reply/signal unions, and ships a
//! [`LoopbackTransport`] that serves in-process providers for tests and
//! demos.

mod loopback;

pub use loopback::{LocalProvider, LoopbackTransport};

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::catalog::{ActivationDescriptor, Capability};
use crate::provider::ProviderUpdate;

/// Boxed future used by the object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport-level failures.
///
/// `Unavailable` and `Timeout` are retryable-elsewhere: the broker reacts
/// by re-selecting. `Remote` is a provider-reported error and is surfaced
/// to the client verbatim. `Disconnected` is treated as provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish a connection to the provider.
    #[error("failed to connect to provider: {0}")]
    Connect(String),

    /// The remote peer is not currently reachable or serving.
    #[error("provider is unavailable")]
    Unavailable,

    /// The call did not complete within its timeout.
    #[error("provider call timed out")]
    Timeout,

    /// The provider explicitly reported an error for this call.
    #[error("provider reported: {0}")]
    Remote(String),

    /// The transport reported the remote peer as disconnected.
    #[error("provider disconnected")]
    Disconnected,
}

impl TransportError {
    /// True if the failure should trigger re-selection rather than being
    /// surfaced to the client as-is.
    pub fn is_retryable_elsewhere(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Unavailable | Self::Timeout | Self::Disconnected
        )
    }
}

/// Status a remote provider reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Serving requests.
    Available,
    /// Temporarily not serving (paused, acquiring a fix, remote lost).
    Unavailable,
    /// Failed; the provider will not recover on this connection.
    Error,
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// A method call into a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderRequest {
    /// `get_status()` - readiness probe.
    GetStatus,
    /// `set_options(map)` - per-session provider options.
    SetOptions(BTreeMap<String, String>),
    /// Capability-specific getter, e.g. "get current address".
    GetFix(Capability),
}

/// A method reply from a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    /// Reply to [`ProviderRequest::GetStatus`].
    Status(RemoteStatus),
    /// Acknowledgement with no payload.
    Ack,
    /// Reply to [`ProviderRequest::GetFix`].
    Fix(ProviderUpdate),
}

/// An asynchronous signal emitted by a provider.
///
/// Delivery is at-least-once and in-order per source.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSignal {
    /// A capability value changed (position moved, address changed, ...).
    Updated(ProviderUpdate),
    /// The provider's self-reported status changed.
    StatusChanged(RemoteStatus),
    /// The transport lost the remote peer.
    Disconnected,
}

/// Connection factory for provider processes.
///
/// Implementations start or attach to the provider named by the activation
/// descriptor. The descriptor is opaque to the broker.
pub trait ProviderTransport: Send + Sync + 'static {
    /// Connect to (and if necessary start) the provider behind `descriptor`.
    fn connect<'a>(
        &'a self,
        descriptor: &'a ActivationDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn ProviderConnection>, TransportError>>;
}

/// One established connection to a provider process.
pub trait ProviderConnection: Send + Sync {
    /// Forward a method call and await its reply.
    fn call(&self, request: ProviderRequest) -> BoxFuture<'_, Result<ProviderReply, TransportError>>;

    /// Subscribe to the provider's signal stream.
    ///
    /// Signals are delivered in emission order. Disconnection of the remote
    /// peer is delivered as [`ProviderSignal::Disconnected`].
    fn signals(&self) -> broadcast::Receiver<ProviderSignal>;

    /// Release the connection and tell the remote to free resources.
    ///
    /// After completion the connection delivers no further replies; calls
    /// fail with [`TransportError::Unavailable`].
    fn close(&self) -> BoxFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Unavailable.is_retryable_elsewhere());
        assert!(TransportError::Timeout.is_retryable_elsewhere());
        assert!(TransportError::Disconnected.is_retryable_elsewhere());
        assert!(TransportError::Connect("refused".into()).is_retryable_elsewhere());
        assert!(!TransportError::Remote("bad options".into()).is_retryable_elsewhere());
    }
}
