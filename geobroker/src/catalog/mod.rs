//! Provider catalog: what is installed and what it claims to support.
//!
//! The catalog is an external data source; this module defines the thin
//! read interface the broker consumes for candidate enumeration, plus a
//! [`StaticCatalog`] backed by an in-memory entry list (typically loaded
//! from the config file, see [`crate::config`]).
//!
//! The broker re-queries the catalog at every re-evaluation rather than
//! caching candidate lists, so an externally refreshed catalog takes
//! effect on the next trigger.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use crate::accuracy::AccuracyRange;

/// A capability interface a provider may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Geographic position fixes (latitude/longitude/altitude).
    Position,
    /// Civic address of the current location.
    Address,
    /// Resolving coordinates to address fields.
    ReverseGeocode,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position => write!(f, "position"),
            Self::Address => write!(f, "address"),
            Self::ReverseGeocode => write!(f, "reverse-geocode"),
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "position" => Ok(Self::Position),
            "address" => Ok(Self::Address),
            "reverse-geocode" | "reverse_geocode" => Ok(Self::ReverseGeocode),
            other => Err(format!("unknown capability '{}'", other)),
        }
    }
}

/// Opaque activation descriptor, passed verbatim to the transport.
///
/// The broker never interprets the endpoint; it only hands it to
/// [`crate::transport::ProviderTransport::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivationDescriptor {
    /// Transport-specific address or service name of the provider.
    pub endpoint: String,
    /// Static options passed to the provider at activation.
    pub options: BTreeMap<String, String>,
}

impl ActivationDescriptor {
    /// Descriptor for an endpoint with no options.
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: BTreeMap::new(),
        }
    }
}

/// One installed provider as the catalog describes it.
///
/// Read-only for the lifetime of a single broker query.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Stable provider identifier.
    pub provider_id: String,
    /// Capability interfaces the provider claims to implement.
    pub interfaces: Vec<Capability>,
    /// Declared best/worst accuracy the provider can produce.
    pub declared_accuracy: AccuracyRange,
    /// True if the provider needs network access to function.
    pub requires_network: bool,
    /// True if the provider needs GPS hardware to function.
    pub requires_gps: bool,
    /// Opaque activation descriptor for the transport.
    pub activation: ActivationDescriptor,
}

impl CatalogEntry {
    /// True if this entry claims to implement `capability`.
    pub fn implements(&self, capability: Capability) -> bool {
        self.interfaces.contains(&capability)
    }

    /// Relative resource cost used as a ranking tie-break.
    ///
    /// Each required hardware/network dependency adds one unit; cheaper
    /// providers rank first at equal accuracy.
    pub fn resource_cost(&self) -> u8 {
        self.requires_network as u8 + self.requires_gps as u8
    }
}

/// Queryable list of installed providers.
///
/// Reads are synchronous and side-effect free from the broker's point of
/// view; how entries are populated is out of scope.
pub trait ProviderCatalog: Send + Sync {
    /// All entries claiming to implement `capability`, in no particular order.
    fn find_candidates(&self, capability: Capability) -> Vec<CatalogEntry>;
}

/// Catalog backed by an in-memory entry list.
///
/// `replace` swaps the whole list, modeling an external catalog refresh;
/// the broker picks the new contents up on its next query.
pub struct StaticCatalog {
    entries: RwLock<Vec<CatalogEntry>>,
}

impl StaticCatalog {
    /// Create a catalog from a list of entries.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Replace the catalog contents (external refresh).
    pub fn replace(&self, entries: Vec<CatalogEntry>) {
        *self.entries.write().expect("catalog lock poisoned") = entries;
    }

    /// Number of entries currently in the catalog.
    pub fn len(&self) -> usize {
        self.entries.read().expect("catalog lock poisoned").len()
    }

    /// True if the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.entries.read().expect("catalog lock poisoned").clone()
    }
}

impl ProviderCatalog for StaticCatalog {
    fn find_candidates(&self, capability: Capability) -> Vec<CatalogEntry> {
        self.entries
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .filter(|e| e.implements(capability))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::{Accuracy, AccuracyLevel};

    fn entry(id: &str, interfaces: Vec<Capability>) -> CatalogEntry {
        CatalogEntry {
            provider_id: id.to_string(),
            interfaces,
            declared_accuracy: AccuracyRange::exact(Accuracy::level_only(AccuracyLevel::Region)),
            requires_network: false,
            requires_gps: false,
            activation: ActivationDescriptor::endpoint(format!("local:{id}")),
        }
    }

    #[test]
    fn test_find_candidates_filters_by_capability() {
        let catalog = StaticCatalog::new(vec![
            entry("gps", vec![Capability::Position]),
            entry("geocoder", vec![Capability::Address, Capability::ReverseGeocode]),
        ]);

        let position = catalog.find_candidates(Capability::Position);
        assert_eq!(position.len(), 1);
        assert_eq!(position[0].provider_id, "gps");

        let address = catalog.find_candidates(Capability::Address);
        assert_eq!(address.len(), 1);
        assert_eq!(address[0].provider_id, "geocoder");
    }

    #[test]
    fn test_replace_takes_effect_on_next_query() {
        let catalog = StaticCatalog::new(vec![entry("gps", vec![Capability::Position])]);
        assert_eq!(catalog.find_candidates(Capability::Position).len(), 1);

        catalog.replace(vec![
            entry("gps", vec![Capability::Position]),
            entry("wifi", vec![Capability::Position]),
        ]);
        assert_eq!(catalog.find_candidates(Capability::Position).len(), 2);
    }

    #[test]
    fn test_resource_cost() {
        let mut e = entry("x", vec![Capability::Position]);
        assert_eq!(e.resource_cost(), 0);
        e.requires_network = true;
        assert_eq!(e.resource_cost(), 1);
        e.requires_gps = true;
        assert_eq!(e.resource_cost(), 2);
    }

    #[test]
    fn test_capability_from_str() {
        assert_eq!("position".parse(), Ok(Capability::Position));
        assert_eq!("reverse-geocode".parse(), Ok(Capability::ReverseGeocode));
        assert!("altitude".parse::<Capability>().is_err());
    }
}
