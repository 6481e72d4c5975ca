//! Capability update payloads reported by providers.
//!
//! Capability interfaces are expressed as one tagged union rather than
//! per-capability subclassing: every getter reply and every change signal
//! carries a [`ProviderUpdate`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::accuracy::Accuracy;
use crate::catalog::Capability;

/// One update from a provider: payload, reported accuracy, timestamp.
///
/// The reported accuracy may differ from the catalog's declared range;
/// providers report actual accuracy per update. Ranking always uses the
/// declared accuracy, the reported one is informational.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderUpdate {
    /// Which capability produced this update.
    pub capability: Capability,
    /// Capability-specific payload.
    pub payload: UpdatePayload,
    /// Accuracy the provider reports for this specific update.
    pub accuracy: Accuracy,
    /// When the provider produced the update.
    pub timestamp: DateTime<Utc>,
}

impl ProviderUpdate {
    /// Update stamped with the current time.
    pub fn now(capability: Capability, payload: UpdatePayload, accuracy: Accuracy) -> Self {
        Self {
            capability,
            payload,
            accuracy,
            timestamp: Utc::now(),
        }
    }
}

/// Capability-specific update payload.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// A position fix.
    Position {
        /// Latitude in decimal degrees.
        latitude: f64,
        /// Longitude in decimal degrees.
        longitude: f64,
        /// Altitude in meters above sea level, if known.
        altitude: Option<f64>,
    },
    /// Civic address of the current location.
    Address {
        /// Address fields, keyed by field name (street, locality, country, ...).
        fields: BTreeMap<String, String>,
    },
    /// A reverse-geocoding result for the given coordinates.
    ReverseGeocode {
        /// Latitude that was resolved.
        latitude: f64,
        /// Longitude that was resolved.
        longitude: f64,
        /// Resolved address fields.
        fields: BTreeMap<String, String>,
    },
}

impl UpdatePayload {
    /// The capability this payload belongs to.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Position { .. } => Capability::Position,
            Self::Address { .. } => Capability::Address,
            Self::ReverseGeocode { .. } => Capability::ReverseGeocode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::{Accuracy, AccuracyLevel};

    #[test]
    fn test_payload_capability() {
        let position = UpdatePayload::Position {
            latitude: 48.85,
            longitude: 2.35,
            altitude: None,
        };
        assert_eq!(position.capability(), Capability::Position);

        let address = UpdatePayload::Address {
            fields: BTreeMap::new(),
        };
        assert_eq!(address.capability(), Capability::Address);
    }

    #[test]
    fn test_now_stamps_timestamp() {
        let before = Utc::now();
        let update = ProviderUpdate::now(
            Capability::Position,
            UpdatePayload::Position {
                latitude: 0.0,
                longitude: 0.0,
                altitude: None,
            },
            Accuracy::level_only(AccuracyLevel::Street),
        );
        assert!(update.timestamp >= before);
        assert_eq!(update.capability, Capability::Position);
    }
}
