//! Configuration for the broker and the provider catalog.
//!
//! One INI file carries both: a `[broker]` section with timeouts and
//! channel capacities, and one `[provider:<id>]` section per installed
//! provider. Settings structs are pure data ([`settings`]); loading and
//! parsing live in [`file`].

mod file;
mod settings;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError};
pub use settings::BrokerSettings;
