//! GeoBroker - location capability brokering
//!
//! This library brokers location data between clients and independently
//! running provider processes. Clients open a session declaring a capability
//! (position, address, reverse-geocode) and criteria (minimum accuracy,
//! network/GPS policy); the broker discovers candidate providers from a
//! catalog, ranks them, activates the best one over an opaque transport,
//! relays its update signals, and transparently re-selects when a provider
//! fails or network connectivity changes.
//!
//! # High-Level API
//!
//! ```ignore
//! use geobroker::broker::LocationBroker;
//! use geobroker::catalog::{Capability, StaticCatalog};
//! use geobroker::connectivity::ConnectivityMonitor;
//! use geobroker::selector::SessionCriteria;
//! use geobroker::transport::LoopbackTransport;
//!
//! let broker = LocationBroker::start(catalog, transport, monitor, settings);
//! let client = broker.client();
//!
//! let session = client.open_session(Capability::Position, criteria).await?;
//! let mut updates = client.subscribe(session).await?;
//! while let Ok(update) = updates.recv().await {
//!     // Handle position update
//! }
//! ```

pub mod accuracy;
pub mod broker;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod logging;
pub mod provider;
pub mod selector;
pub mod transport;

/// Version of the GeoBroker library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
