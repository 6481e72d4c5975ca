//! Built-in demo provider for trying the broker without real providers.
//!
//! Simulates a GPS receiver walking a position around a starting point,
//! pushing an update once per second.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use geobroker::accuracy::{Accuracy, AccuracyLevel, AccuracyRange};
use geobroker::catalog::{ActivationDescriptor, Capability, CatalogEntry};
use geobroker::provider::{ProviderUpdate, UpdatePayload};
use geobroker::transport::{
    LocalProvider, LoopbackTransport, ProviderReply, ProviderRequest, ProviderSignal, RemoteStatus,
    TransportError,
};

const DEMO_ENDPOINT: &str = "local:demo-gps";
const TICK: Duration = Duration::from_secs(1);

/// Catalog entry for the demo provider.
pub fn demo_entry() -> CatalogEntry {
    CatalogEntry {
        provider_id: "demo-gps".to_string(),
        interfaces: vec![Capability::Position],
        declared_accuracy: AccuracyRange::new(
            Accuracy::new(AccuracyLevel::Detailed, 5.0, f64::NAN),
            Accuracy::level_only(AccuracyLevel::Street),
        ),
        requires_network: false,
        requires_gps: false,
        activation: ActivationDescriptor::endpoint(DEMO_ENDPOINT),
    }
}

/// Register the demo provider on `transport` and start its ticker.
pub fn install(transport: &LoopbackTransport) {
    let provider = DemoGps::new();
    let ticker = Arc::clone(&provider);
    tokio::spawn(async move { ticker.tick_forever().await });
    transport.register(DEMO_ENDPOINT, provider);
}

struct DemoGps {
    signals_tx: broadcast::Sender<ProviderSignal>,
}

impl DemoGps {
    fn new() -> Arc<Self> {
        let (signals_tx, _) = broadcast::channel(16);
        Arc::new(Self { signals_tx })
    }

    fn fix(step: u64) -> ProviderUpdate {
        // Small drift around Greenwich so successive updates differ.
        let wobble = (step % 60) as f64 * 0.0001;
        ProviderUpdate::now(
            Capability::Position,
            UpdatePayload::Position {
                latitude: 51.4779 + wobble,
                longitude: -0.0015 + wobble,
                altitude: Some(46.0),
            },
            Accuracy::new(AccuracyLevel::Detailed, 5.0, f64::NAN),
        )
    }

    async fn tick_forever(&self) {
        let mut step = 0u64;
        loop {
            tokio::time::sleep(TICK).await;
            step += 1;
            // No subscribers is fine; the broker attaches when a session
            // selects this provider.
            let _ = self.signals_tx.send(ProviderSignal::Updated(Self::fix(step)));
        }
    }
}

impl LocalProvider for DemoGps {
    fn handle(&self, request: ProviderRequest) -> Result<ProviderReply, TransportError> {
        match request {
            ProviderRequest::GetStatus => Ok(ProviderReply::Status(RemoteStatus::Available)),
            ProviderRequest::SetOptions(_) => Ok(ProviderReply::Ack),
            ProviderRequest::GetFix(Capability::Position) => Ok(ProviderReply::Fix(Self::fix(0))),
            ProviderRequest::GetFix(other) => Err(TransportError::Remote(format!(
                "demo provider does not serve {other}"
            ))),
        }
    }

    fn signals(&self) -> broadcast::Receiver<ProviderSignal> {
        self.signals_tx.subscribe()
    }
}
