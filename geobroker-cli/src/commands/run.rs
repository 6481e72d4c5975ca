//! Run command - start the broker and stream one session to the console.

use std::path::PathBuf;
use std::sync::Arc;

use geobroker::accuracy::{Accuracy, AccuracyLevel};
use geobroker::broker::LocationBroker;
use geobroker::catalog::{Capability, StaticCatalog};
use geobroker::config::{config_file_path, ConfigFile};
use geobroker::connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivityState};
use geobroker::logging::{default_log_dir, default_log_file, init_logging};
use geobroker::provider::{ProviderUpdate, UpdatePayload};
use geobroker::selector::SessionCriteria;
use geobroker::transport::{LoopbackTransport, ProviderTransport};
use tracing::info;

use crate::demo;
use crate::error::CliError;

/// Arguments for the run command.
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub capability: String,
    pub min_accuracy: Option<String>,
    pub no_network: bool,
    pub demo: bool,
}

/// Run the broker until interrupted.
pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let _logging = init_logging(default_log_dir(), default_log_file())
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let capability: Capability = args.capability.parse().map_err(CliError::InvalidArgument)?;

    let path = args.config.unwrap_or_else(config_file_path);
    let config = ConfigFile::load_from(&path)?;
    info!(config = %path.display(), providers = config.providers.len(), "Configuration loaded");

    let mut entries = config.providers.clone();
    let transport = Arc::new(LoopbackTransport::new());
    if args.demo || entries.is_empty() {
        println!("Using built-in demo provider");
        demo::install(&transport);
        entries.push(demo::demo_entry());
    }
    let catalog = Arc::new(StaticCatalog::new(entries));

    // Host connectivity tracking is out of scope here; assume online so
    // network providers are eligible.
    let connectivity = Arc::new(ConnectivityMonitor::new());
    connectivity.publish(ConnectivityEvent::state_only(ConnectivityState::Online));

    let broker = LocationBroker::start(
        catalog,
        Arc::clone(&transport) as Arc<dyn ProviderTransport>,
        Arc::clone(&connectivity),
        config.broker,
    );
    let client = broker.client();

    let mut criteria = match &args.min_accuracy {
        Some(level) => {
            let level: AccuracyLevel = level.parse().map_err(CliError::InvalidArgument)?;
            SessionCriteria::with_minimum(Accuracy::level_only(level))
        }
        None => SessionCriteria::default(),
    };
    if args.no_network {
        criteria = criteria.deny_network();
    }

    println!("GeoBroker v{}", geobroker::VERSION);
    println!("Capability: {capability}");
    println!("Press Ctrl-C to stop");
    println!();

    let session = client.open_session(capability, criteria).await?;
    let mut updates = client.subscribe(session).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted, shutting down...");
                break;
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => print_update(&update),
                    // Lagged just means we missed superseded updates.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    client.close_session(session).await?;
    broker.shutdown().await;
    Ok(())
}

fn print_update(update: &ProviderUpdate) {
    let time = update.timestamp.format("%H:%M:%S");
    match &update.payload {
        UpdatePayload::Position {
            latitude,
            longitude,
            altitude,
        } => {
            let altitude = altitude
                .map(|a| format!(" alt={a:.0}m"))
                .unwrap_or_default();
            println!("[{time}] position: {latitude:.5}, {longitude:.5}{altitude}");
        }
        UpdatePayload::Address { fields } => {
            let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("[{time}] address: {}", parts.join(", "));
        }
        UpdatePayload::ReverseGeocode {
            latitude,
            longitude,
            fields,
        } => {
            let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!(
                "[{time}] reverse-geocode: {latitude:.5}, {longitude:.5} -> {}",
                parts.join(", ")
            );
        }
    }
}
