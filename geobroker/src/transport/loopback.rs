//! In-process loopback transport.
//!
//! Serves [`LocalProvider`] implementations registered under endpoint names.
//! Used by the test suite and the CLI demo; a production deployment plugs a
//! real IPC transport into the same [`ProviderTransport`] trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    BoxFuture, ProviderConnection, ProviderReply, ProviderRequest, ProviderSignal,
    ProviderTransport, TransportError,
};
use crate::catalog::ActivationDescriptor;

/// An in-process provider served by the loopback transport.
pub trait LocalProvider: Send + Sync + 'static {
    /// Handle one method call.
    fn handle(&self, request: ProviderRequest) -> Result<ProviderReply, TransportError>;

    /// Subscribe to the provider's signal stream.
    fn signals(&self) -> broadcast::Receiver<ProviderSignal>;

    /// Called when a connection to this provider is closed.
    fn connection_closed(&self) {}
}

/// Transport that connects to providers registered in-process.
///
/// Each [`connect`](ProviderTransport::connect) looks the endpoint up in
/// the registry; unknown endpoints fail with [`TransportError::Connect`].
#[derive(Default)]
pub struct LoopbackTransport {
    registry: DashMap<String, Arc<dyn LocalProvider>>,
}

impl LoopbackTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under an endpoint name.
    pub fn register(&self, endpoint: impl Into<String>, provider: Arc<dyn LocalProvider>) {
        self.registry.insert(endpoint.into(), provider);
    }

    /// Remove a provider; existing connections keep their reference.
    pub fn unregister(&self, endpoint: &str) {
        self.registry.remove(endpoint);
    }
}

impl ProviderTransport for LoopbackTransport {
    fn connect<'a>(
        &'a self,
        descriptor: &'a ActivationDescriptor,
    ) -> BoxFuture<'a, Result<Box<dyn ProviderConnection>, TransportError>> {
        Box::pin(async move {
            let provider = self
                .registry
                .get(&descriptor.endpoint)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| {
                    TransportError::Connect(format!(
                        "no provider registered at '{}'",
                        descriptor.endpoint
                    ))
                })?;

            debug!(endpoint = %descriptor.endpoint, "Loopback connection established");
            Ok(Box::new(LoopbackConnection {
                provider,
                closed: AtomicBool::new(false),
            }) as Box<dyn ProviderConnection>)
        })
    }
}

struct LoopbackConnection {
    provider: Arc<dyn LocalProvider>,
    closed: AtomicBool,
}

impl ProviderConnection for LoopbackConnection {
    fn call(&self, request: ProviderRequest) -> BoxFuture<'_, Result<ProviderReply, TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Unavailable);
            }
            self.provider.handle(request)
        })
    }

    fn signals(&self) -> broadcast::Receiver<ProviderSignal> {
        self.provider.signals()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // swap: only the first close notifies the provider.
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.provider.connection_closed();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct EchoProvider {
        signals_tx: broadcast::Sender<ProviderSignal>,
        closes: AtomicUsize,
    }

    impl EchoProvider {
        fn new() -> Arc<Self> {
            let (signals_tx, _) = broadcast::channel(8);
            Arc::new(Self {
                signals_tx,
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl LocalProvider for EchoProvider {
        fn handle(&self, request: ProviderRequest) -> Result<ProviderReply, TransportError> {
            match request {
                ProviderRequest::GetStatus => {
                    Ok(ProviderReply::Status(super::super::RemoteStatus::Available))
                }
                ProviderRequest::SetOptions(_) => Ok(ProviderReply::Ack),
                ProviderRequest::GetFix(_) => Err(TransportError::Remote("no fix yet".into())),
            }
        }

        fn signals(&self) -> broadcast::Receiver<ProviderSignal> {
            self.signals_tx.subscribe()
        }

        fn connection_closed(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_connect_unknown_endpoint_fails() {
        let transport = LoopbackTransport::new();
        let result = transport
            .connect(&ActivationDescriptor::endpoint("local:ghost"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let transport = LoopbackTransport::new();
        transport.register("local:echo", EchoProvider::new());

        let conn = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await
            .unwrap();
        let reply = conn.call(ProviderRequest::GetStatus).await.unwrap();
        assert_eq!(
            reply,
            ProviderReply::Status(super::super::RemoteStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_remote_error_passes_through() {
        let transport = LoopbackTransport::new();
        transport.register("local:echo", EchoProvider::new());

        let conn = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await
            .unwrap();
        let err = conn
            .call(ProviderRequest::GetFix(crate::catalog::Capability::Position))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Remote("no fix yet".into()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_calls() {
        let transport = LoopbackTransport::new();
        let provider = EchoProvider::new();
        transport.register("local:echo", Arc::clone(&provider) as Arc<dyn LocalProvider>);

        let conn = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await
            .unwrap();

        conn.close().await;
        conn.close().await;
        assert_eq!(provider.closes.load(Ordering::SeqCst), 1);

        let err = conn.call(ProviderRequest::GetStatus).await.unwrap_err();
        assert_eq!(err, TransportError::Unavailable);
    }

    #[tokio::test]
    async fn test_unregister_blocks_new_connections_only() {
        let transport = LoopbackTransport::new();
        let provider = EchoProvider::new();
        transport.register("local:echo", Arc::clone(&provider) as Arc<dyn LocalProvider>);

        let conn = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await
            .unwrap();

        transport.unregister("local:echo");

        // The established connection keeps its provider reference.
        let reply = conn.call(ProviderRequest::GetStatus).await.unwrap();
        assert_eq!(
            reply,
            ProviderReply::Status(super::super::RemoteStatus::Available)
        );

        // New connections no longer resolve the endpoint.
        let result = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_signals_fan_out_through_connection() {
        let transport = LoopbackTransport::new();
        let provider = EchoProvider::new();
        transport.register("local:echo", Arc::clone(&provider) as Arc<dyn LocalProvider>);

        let conn = transport
            .connect(&ActivationDescriptor::endpoint("local:echo"))
            .await
            .unwrap();
        let mut signals = conn.signals();

        provider
            .signals_tx
            .send(ProviderSignal::Disconnected)
            .unwrap();
        assert_eq!(signals.recv().await.unwrap(), ProviderSignal::Disconnected);
    }
}
