//! Catalog command - show the configured providers.

use std::path::PathBuf;

use geobroker::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the catalog command.
pub fn run(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(config_file_path);
    let config = ConfigFile::load_from(&path)?;

    println!("GeoBroker Provider Catalog v{}", geobroker::VERSION);
    println!("Config: {}", path.display());
    println!();

    if config.providers.is_empty() {
        println!("No providers configured.");
        println!("Add [provider:<id>] sections to the config file, or try `geobroker run --demo`.");
        return Ok(());
    }

    for entry in &config.providers {
        let interfaces: Vec<String> = entry.interfaces.iter().map(|c| c.to_string()).collect();
        println!("{}", entry.provider_id);
        println!("  interfaces:  {}", interfaces.join(", "));
        println!(
            "  accuracy:    {} .. {}",
            entry.declared_accuracy.best, entry.declared_accuracy.worst
        );
        println!(
            "  requires:    network={} gps={}",
            entry.requires_network, entry.requires_gps
        );
        println!("  endpoint:    {}", entry.activation.endpoint);
        println!();
    }

    Ok(())
}
