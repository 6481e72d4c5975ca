//! Network connectivity tracking.
//!
//! The broker uses connectivity as a selection input: providers that require
//! the network are only eligible while the network is reachable. This module
//! defines the state model and the [`ConnectivityMonitor`] that de-duplicates
//! raw state pushes from an external source and fans transitions out to any
//! number of subscribers.

mod monitor;

pub use monitor::{ConnectivityEvents, ConnectivityMonitor};

use std::fmt;

/// Network reachability state.
///
/// Transitions come only from the connectivity monitor. There is no terminal
/// state; the monitor runs for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// The underlying source has not reported yet, or is unreachable.
    ///
    /// Callers must treat this as "cannot use network-dependent providers".
    #[default]
    Unknown,
    /// No network connectivity.
    Offline,
    /// Connectivity is being established (association, DHCP, captive portal).
    Acquiring,
    /// Network is reachable.
    Online,
}

impl ConnectivityState {
    /// True if network-dependent providers can be used in this state.
    pub fn network_usable(&self) -> bool {
        matches!(self, Self::Online | Self::Acquiring)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Offline => write!(f, "Offline"),
            Self::Acquiring => write!(f, "Acquiring"),
            Self::Online => write!(f, "Online"),
        }
    }
}

/// One connectivity transition, with the facts known at that point.
///
/// `access_point` and `router` identify the current network attachment and
/// are normally only present while [`ConnectivityState::Online`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectivityEvent {
    /// Reachability state after the transition.
    pub state: ConnectivityState,
    /// Identifier of the current access point, if known.
    pub access_point: Option<String>,
    /// Identifier of the current router/gateway, if known.
    pub router: Option<String>,
}

impl ConnectivityEvent {
    /// Event carrying only a state, with no attachment facts.
    pub fn state_only(state: ConnectivityState) -> Self {
        Self {
            state,
            access_point: None,
            router: None,
        }
    }

    /// Online event with attachment identifiers.
    pub fn online(access_point: impl Into<String>, router: impl Into<String>) -> Self {
        Self {
            state: ConnectivityState::Online,
            access_point: Some(access_point.into()),
            router: Some(router.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_unknown() {
        assert_eq!(ConnectivityState::default(), ConnectivityState::Unknown);
        assert_eq!(ConnectivityEvent::default().state, ConnectivityState::Unknown);
    }

    #[test]
    fn test_network_usable() {
        assert!(ConnectivityState::Online.network_usable());
        assert!(ConnectivityState::Acquiring.network_usable());
        assert!(!ConnectivityState::Offline.network_usable());
        assert!(!ConnectivityState::Unknown.network_usable());
    }

    #[test]
    fn test_online_event_carries_attachment() {
        let event = ConnectivityEvent::online("ap-42", "gw-1");
        assert_eq!(event.state, ConnectivityState::Online);
        assert_eq!(event.access_point.as_deref(), Some("ap-42"));
        assert_eq!(event.router.as_deref(), Some("gw-1"));
    }
}
