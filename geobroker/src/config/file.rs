//! Configuration file handling for ~/.geobroker/config.ini.
//!
//! The file carries a `[broker]` section (timeouts, capacities) plus one
//! `[provider:<id>]` section per installed provider. Provider sections feed
//! the catalog; unknown keys are ignored so externally managed files can
//! carry extra metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::settings::BrokerSettings;
use crate::accuracy::{Accuracy, AccuracyLevel, AccuracyRange};
use crate::catalog::{ActivationDescriptor, Capability, CatalogEntry};

/// Prefix of provider sections: `[provider:<id>]`.
const PROVIDER_SECTION_PREFIX: &str = "provider:";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// A provider section is missing a required key
    #[error("Provider '{provider_id}' is missing required key '{key}'")]
    MissingKey { provider_id: String, key: String },
}

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Broker tunables from the `[broker]` section.
    pub broker: BrokerSettings,
    /// Catalog entries from `[provider:<id>]` sections.
    pub providers: Vec<CatalogEntry>,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.geobroker/config.ini).
    ///
    /// If the file doesn't exist, returns defaults with an empty catalog.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::parse(&ini)
    }

    /// Parse an already-loaded INI document.
    pub fn parse(ini: &Ini) -> Result<Self, ConfigFileError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("broker")) {
            for (key, value) in section.iter() {
                config.apply_broker_key(key, value)?;
            }
        }

        for (name, section) in ini.iter() {
            let Some(name) = name else { continue };
            let Some(provider_id) = name.strip_prefix(PROVIDER_SECTION_PREFIX) else {
                continue;
            };
            let mut entry = ProviderSection::new(name, provider_id);
            for (key, value) in section.iter() {
                entry.apply(key, value)?;
            }
            config.providers.push(entry.into_entry()?);
        }

        Ok(config)
    }

    fn apply_broker_key(&mut self, key: &str, value: &str) -> Result<(), ConfigFileError> {
        match key {
            "activation_timeout_ms" => {
                self.broker.activation_timeout = Duration::from_millis(parse("broker", key, value)?);
            }
            "invoke_timeout_ms" => {
                self.broker.invoke_timeout = Duration::from_millis(parse("broker", key, value)?);
            }
            "unavailable_grace_ms" => {
                self.broker.unavailable_grace = Duration::from_millis(parse("broker", key, value)?);
            }
            "command_channel_capacity" => {
                self.broker.command_channel_capacity = parse("broker", key, value)?;
            }
            "session_update_capacity" => {
                self.broker.session_update_capacity = parse("broker", key, value)?;
            }
            // Unknown keys are ignored for forward compatibility.
            _ => {}
        }
        Ok(())
    }
}

/// Accumulates one `[provider:<id>]` section.
struct ProviderSection {
    section: String,
    provider_id: String,
    interfaces: Vec<Capability>,
    best: Option<Accuracy>,
    worst: Option<Accuracy>,
    requires_network: bool,
    requires_gps: bool,
    endpoint: Option<String>,
    options: BTreeMap<String, String>,
}

impl ProviderSection {
    fn new(section: &str, provider_id: &str) -> Self {
        Self {
            section: section.to_string(),
            provider_id: provider_id.to_string(),
            interfaces: Vec::new(),
            best: None,
            worst: None,
            requires_network: false,
            requires_gps: false,
            endpoint: None,
            options: BTreeMap::new(),
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigFileError> {
        match key {
            "interfaces" => {
                for item in value.split(',') {
                    let capability =
                        item.trim()
                            .parse::<Capability>()
                            .map_err(|reason| ConfigFileError::InvalidValue {
                                section: self.section.clone(),
                                key: key.to_string(),
                                value: value.to_string(),
                                reason,
                            })?;
                    self.interfaces.push(capability);
                }
            }
            "best_accuracy" => self.best = Some(self.parse_accuracy(key, value)?),
            "worst_accuracy" => self.worst = Some(self.parse_accuracy(key, value)?),
            "requires_network" => self.requires_network = parse(&self.section, key, value)?,
            "requires_gps" => self.requires_gps = parse(&self.section, key, value)?,
            "endpoint" => self.endpoint = Some(value.to_string()),
            _ => {
                // Activation options use a dotted prefix: `option.rate_hz = 1`.
                // A colon cannot work here; the INI dialect treats `:` in a
                // key line as a key/value delimiter.
                if let Some(option) = key.strip_prefix("option.") {
                    self.options.insert(option.to_string(), value.to_string());
                }
                // Other unknown keys ignored.
            }
        }
        Ok(())
    }

    /// Accuracy values are `level` or `level/meters`, e.g. `street/25`.
    fn parse_accuracy(&self, key: &str, value: &str) -> Result<Accuracy, ConfigFileError> {
        match value.split_once('/') {
            None => {
                let level: AccuracyLevel = value
                    .trim()
                    .parse()
                    .map_err(|reason| self.invalid(key, value, reason))?;
                Ok(Accuracy::level_only(level))
            }
            Some((level, meters)) => {
                let level: AccuracyLevel = level
                    .trim()
                    .parse()
                    .map_err(|reason| self.invalid(key, value, reason))?;
                let meters: f64 = meters
                    .trim()
                    .parse()
                    .map_err(|e| self.invalid(key, value, format!("bad meters value: {e}")))?;
                Ok(Accuracy::new(level, meters, f64::NAN))
            }
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: String) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.section.clone(),
            key: key.to_string(),
            value: value.to_string(),
            reason,
        }
    }

    fn into_entry(self) -> Result<CatalogEntry, ConfigFileError> {
        let missing = |key: &str| ConfigFileError::MissingKey {
            provider_id: self.provider_id.clone(),
            key: key.to_string(),
        };

        if self.interfaces.is_empty() {
            return Err(missing("interfaces"));
        }
        let endpoint = self.endpoint.ok_or_else(|| missing("endpoint"))?;
        let best = self.best.ok_or_else(|| missing("best_accuracy"))?;
        let worst = self.worst.unwrap_or_else(Accuracy::none);

        Ok(CatalogEntry {
            provider_id: self.provider_id,
            interfaces: self.interfaces,
            declared_accuracy: AccuracyRange::new(best, worst),
            requires_network: self.requires_network,
            requires_gps: self.requires_gps,
            activation: ActivationDescriptor {
                endpoint,
                options: self.options,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Get the path to the config directory (~/.geobroker).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".geobroker")
}

/// Get the path to the config file (~/.geobroker/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).expect("test ini must parse");
        ConfigFile::parse(&ini)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ConfigFile::load_from(Path::new("/nonexistent/geobroker.ini")).unwrap();
        assert_eq!(config.broker, BrokerSettings::default());
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_broker_section() {
        let config = parse_str(
            "[broker]\n\
             activation_timeout_ms = 1500\n\
             invoke_timeout_ms = 700\n\
             unavailable_grace_ms = 2000\n\
             command_channel_capacity = 64\n",
        )
        .unwrap();
        assert_eq!(config.broker.activation_timeout, Duration::from_millis(1500));
        assert_eq!(config.broker.invoke_timeout, Duration::from_millis(700));
        assert_eq!(config.broker.unavailable_grace, Duration::from_millis(2000));
        assert_eq!(config.broker.command_channel_capacity, 64);
        // Unset keys keep defaults.
        assert_eq!(
            config.broker.session_update_capacity,
            BrokerSettings::default().session_update_capacity
        );
    }

    #[test]
    fn test_provider_section() {
        let config = parse_str(
            "[provider:gps]\n\
             interfaces = position\n\
             best_accuracy = detailed/5\n\
             worst_accuracy = street\n\
             requires_gps = true\n\
             endpoint = local:gps\n\
             option.rate_hz = 1\n\
             option.antenna = roof\n",
        )
        .unwrap();

        assert_eq!(config.providers.len(), 1);
        let entry = &config.providers[0];
        assert_eq!(entry.provider_id, "gps");
        assert_eq!(entry.interfaces, vec![Capability::Position]);
        assert_eq!(entry.declared_accuracy.best.level(), AccuracyLevel::Detailed);
        assert_eq!(entry.declared_accuracy.best.horizontal_error(), Some(5.0));
        assert_eq!(entry.declared_accuracy.worst.level(), AccuracyLevel::Street);
        assert!(entry.requires_gps);
        assert!(!entry.requires_network);
        assert_eq!(entry.activation.endpoint, "local:gps");
        assert_eq!(entry.activation.options.get("rate_hz").map(String::as_str), Some("1"));
        assert_eq!(entry.activation.options.get("antenna").map(String::as_str), Some("roof"));
    }

    #[test]
    fn test_multiple_interfaces() {
        let config = parse_str(
            "[provider:geocoder]\n\
             interfaces = address, reverse-geocode\n\
             best_accuracy = street\n\
             requires_network = true\n\
             endpoint = local:geocoder\n",
        )
        .unwrap();
        assert_eq!(
            config.providers[0].interfaces,
            vec![Capability::Address, Capability::ReverseGeocode]
        );
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let err = parse_str(
            "[provider:gps]\n\
             interfaces = position\n\
             best_accuracy = street\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::MissingKey { ref key, .. } if key == "endpoint"));
    }

    #[test]
    fn test_invalid_capability_is_an_error() {
        let err = parse_str(
            "[provider:gps]\n\
             interfaces = altitude\n\
             best_accuracy = street\n\
             endpoint = local:gps\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { .. }));
    }
}
