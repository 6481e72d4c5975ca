//! Pure candidate ranking.
//!
//! Given a capability request, the session criteria, and the current
//! connectivity state, [`rank`] reduces a set of catalog entries to an
//! ordered preference list, best first. An empty result is not an error:
//! it means "no capable provider currently", and the broker surfaces that
//! as an explicit unavailable status instead of blocking.

use tracing::debug;

use crate::accuracy::Accuracy;
use crate::catalog::{Capability, CatalogEntry};
use crate::connectivity::ConnectivityState;

/// What a session requires from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCriteria {
    /// Minimum declared best-case accuracy a candidate must satisfy.
    pub min_accuracy: Accuracy,
    /// Whether the session permits network-dependent providers.
    pub allow_network: bool,
    /// Whether the session permits providers needing GPS hardware.
    pub allow_gps: bool,
}

impl SessionCriteria {
    /// Criteria with a minimum accuracy, permitting network and GPS.
    pub fn with_minimum(min_accuracy: Accuracy) -> Self {
        Self {
            min_accuracy,
            allow_network: true,
            allow_gps: true,
        }
    }

    /// Forbid network-dependent providers.
    pub fn deny_network(mut self) -> Self {
        self.allow_network = false;
        self
    }

    /// Forbid providers that need GPS hardware.
    pub fn deny_gps(mut self) -> Self {
        self.allow_gps = false;
        self
    }

    /// True if re-ranking this session can be affected by connectivity.
    ///
    /// Sessions that forbid network providers never gain or lose candidates
    /// on a connectivity transition.
    pub fn network_sensitive(&self) -> bool {
        self.allow_network
    }
}

impl Default for SessionCriteria {
    fn default() -> Self {
        Self::with_minimum(Accuracy::none())
    }
}

/// Rank catalog entries for a capability request, best first.
///
/// Filtering, in order:
/// 1. the entry must implement `capability`;
/// 2. hard criteria: network forbidden, GPS forbidden, or network required
///    while the network is not usable ([`ConnectivityState::Offline`] and
///    [`ConnectivityState::Unknown`] both count as unusable);
/// 3. the declared best-case accuracy must satisfy the criteria minimum.
///
/// Survivors sort by descending declared best accuracy, then ascending
/// resource cost, then ascending provider id for determinism.
pub fn rank(
    capability: Capability,
    criteria: &SessionCriteria,
    connectivity: ConnectivityState,
    candidates: Vec<CatalogEntry>,
) -> Vec<CatalogEntry> {
    let considered = candidates.len();
    let mut eligible: Vec<CatalogEntry> = candidates
        .into_iter()
        .filter(|entry| is_eligible(entry, capability, criteria, connectivity))
        .collect();

    eligible.sort_by(|a, b| {
        b.declared_accuracy
            .best
            .cmp(&a.declared_accuracy.best)
            .then_with(|| a.resource_cost().cmp(&b.resource_cost()))
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });

    debug!(
        capability = %capability,
        connectivity = %connectivity,
        considered,
        eligible = eligible.len(),
        "Ranked provider candidates"
    );

    eligible
}

/// True if `entry` passes the capability and hard-criteria filters.
pub fn is_eligible(
    entry: &CatalogEntry,
    capability: Capability,
    criteria: &SessionCriteria,
    connectivity: ConnectivityState,
) -> bool {
    if !entry.implements(capability) {
        return false;
    }
    if entry.requires_network && (!criteria.allow_network || !connectivity.network_usable()) {
        return false;
    }
    if entry.requires_gps && !criteria.allow_gps {
        return false;
    }
    entry.declared_accuracy.best.satisfies(&criteria.min_accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::{AccuracyLevel, AccuracyRange};
    use crate::catalog::ActivationDescriptor;

    fn entry(id: &str, level: AccuracyLevel, network: bool, gps: bool) -> CatalogEntry {
        CatalogEntry {
            provider_id: id.to_string(),
            interfaces: vec![Capability::Position],
            declared_accuracy: AccuracyRange::new(
                Accuracy::level_only(level),
                Accuracy::level_only(AccuracyLevel::None),
            ),
            requires_network: network,
            requires_gps: gps,
            activation: ActivationDescriptor::endpoint(format!("local:{id}")),
        }
    }

    fn min(level: AccuracyLevel) -> SessionCriteria {
        SessionCriteria::with_minimum(Accuracy::level_only(level))
    }

    #[test]
    fn test_filters_wrong_capability() {
        let mut e = entry("geocoder", AccuracyLevel::Street, false, false);
        e.interfaces = vec![Capability::Address];

        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None),
            ConnectivityState::Online,
            vec![e],
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_filters_network_forbidden() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None).deny_network(),
            ConnectivityState::Online,
            vec![
                entry("wifi", AccuracyLevel::Street, true, false),
                entry("cell", AccuracyLevel::Region, false, false),
            ],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider_id, "cell");
    }

    #[test]
    fn test_filters_gps_forbidden() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None).deny_gps(),
            ConnectivityState::Online,
            vec![entry("gps", AccuracyLevel::Detailed, false, true)],
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_filters_network_provider_when_offline() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::Region),
            ConnectivityState::Offline,
            vec![
                entry("wifi", AccuracyLevel::Street, true, false),
                entry("cell", AccuracyLevel::Region, false, false),
            ],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider_id, "cell");
    }

    #[test]
    fn test_unknown_connectivity_counts_as_unusable() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None),
            ConnectivityState::Unknown,
            vec![entry("wifi", AccuracyLevel::Street, true, false)],
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_filters_insufficient_accuracy() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::Street),
            ConnectivityState::Online,
            vec![entry("ip", AccuracyLevel::Region, true, false)],
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_orders_by_accuracy_descending() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None),
            ConnectivityState::Online,
            vec![
                entry("ip", AccuracyLevel::Region, true, false),
                entry("gps", AccuracyLevel::Detailed, false, true),
                entry("wifi", AccuracyLevel::Street, true, false),
            ],
        );
        let ids: Vec<&str> = ranked.iter().map(|e| e.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["gps", "wifi", "ip"]);
    }

    #[test]
    fn test_ties_break_by_resource_cost_then_id() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None),
            ConnectivityState::Online,
            vec![
                entry("b-costly", AccuracyLevel::Street, true, true),
                entry("z-cheap", AccuracyLevel::Street, false, false),
                entry("a-cheap", AccuracyLevel::Street, false, false),
            ],
        );
        let ids: Vec<&str> = ranked.iter().map(|e| e.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["a-cheap", "z-cheap", "b-costly"]);
    }

    #[test]
    fn test_empty_candidate_set_is_not_an_error() {
        let ranked = rank(
            Capability::Position,
            &min(AccuracyLevel::None),
            ConnectivityState::Online,
            Vec::new(),
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_never_returns_hard_criteria_violations() {
        // Property from the test plan: whatever the input, no ranked entry
        // misses the capability or violates a forbidden-resource criterion.
        let criteria = min(AccuracyLevel::None).deny_network().deny_gps();
        let candidates = vec![
            entry("a", AccuracyLevel::Street, true, false),
            entry("b", AccuracyLevel::Street, false, true),
            entry("c", AccuracyLevel::Street, true, true),
            entry("d", AccuracyLevel::Street, false, false),
        ];
        let ranked = rank(
            Capability::Position,
            &criteria,
            ConnectivityState::Online,
            candidates,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].provider_id, "d");
        for e in &ranked {
            assert!(e.implements(Capability::Position));
            assert!(!e.requires_network);
            assert!(!e.requires_gps);
        }
    }
}
