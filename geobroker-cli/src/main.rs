//! GeoBroker CLI - command-line interface to the location broker.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod demo;
mod error;

use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "geobroker")]
#[command(version = geobroker::VERSION)]
#[command(about = "Broker location data between clients and providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker and stream one session to the console
    Run {
        /// Path to the config file (default: ~/.geobroker/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Capability to request: position, address or reverse-geocode
        #[arg(long, default_value = "position")]
        capability: String,

        /// Minimum accuracy level: none, country, region, locality,
        /// postalcode, street or detailed
        #[arg(long)]
        min_accuracy: Option<String>,

        /// Refuse network-dependent providers
        #[arg(long)]
        no_network: bool,

        /// Add the built-in demo provider to the catalog
        #[arg(long)]
        demo: bool,
    },
    /// Show the configured provider catalog
    Catalog {
        /// Path to the config file (default: ~/.geobroker/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            config,
            capability,
            min_accuracy,
            no_network,
            demo,
        } => {
            commands::run::run(RunArgs {
                config,
                capability,
                min_accuracy,
                no_network,
                demo,
            })
            .await
        }
        Command::Catalog { config } => commands::catalog::run(config),
    };

    if let Err(e) = result {
        e.exit();
    }
}
