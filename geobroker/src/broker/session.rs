//! Per-session state held by the broker actor.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use tokio::sync::broadcast;

use crate::catalog::{Capability, CatalogEntry};
use crate::provider::ProviderUpdate;
use crate::selector::SessionCriteria;

/// Opaque session identifier, unique for the lifetime of one broker.
pub type SessionId = u64;

/// Client-visible state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Bound to a live provider.
    Active { provider_id: String },
    /// A provider has been selected and is activating.
    Activating { provider_id: String },
    /// No provider currently serves this session.
    ///
    /// The session stays open; the broker rebinds when the catalog or
    /// connectivity changes in its favor.
    Unavailable,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active { provider_id } => write!(f, "Active({provider_id})"),
            Self::Activating { provider_id } => write!(f, "Activating({provider_id})"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Internal state of one open session.
///
/// `last_update` and `updates_tx` belong to the session, not to the bound
/// handle: a rebind changes where updates come from without losing the
/// cached value or dropping subscriber receivers.
pub(super) struct SessionState {
    pub capability: Capability,
    pub criteria: SessionCriteria,
    /// Provider the session is currently bound to.
    pub bound: Option<String>,
    /// Provider the session is waiting on an activation for.
    ///
    /// Cleared when the session stops waiting; an activation result only
    /// counts for sessions that still name its provider here.
    pub activating: Option<String>,
    /// Remaining ranked candidates, best first, after the current choice.
    pub fallbacks: VecDeque<CatalogEntry>,
    /// Providers that failed this session since the last connectivity change.
    pub failed: HashSet<String>,
    /// Session options, re-applied to every newly bound provider.
    pub options: BTreeMap<String, String>,
    /// Fan-out of updates to this session's subscribers.
    pub updates_tx: broadcast::Sender<ProviderUpdate>,
    /// Most recent update delivered to this session.
    pub last_update: Option<ProviderUpdate>,
}

impl SessionState {
    pub fn new(capability: Capability, criteria: SessionCriteria, update_capacity: usize) -> Self {
        let (updates_tx, _) = broadcast::channel(update_capacity);
        Self {
            capability,
            criteria,
            bound: None,
            activating: None,
            fallbacks: VecDeque::new(),
            failed: HashSet::new(),
            options: BTreeMap::new(),
            updates_tx,
            last_update: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if let Some(provider_id) = &self.bound {
            SessionStatus::Active {
                provider_id: provider_id.clone(),
            }
        } else if let Some(provider_id) = &self.activating {
            SessionStatus::Activating {
                provider_id: provider_id.clone(),
            }
        } else {
            SessionStatus::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::Accuracy;

    fn session() -> SessionState {
        SessionState::new(
            Capability::Position,
            SessionCriteria::with_minimum(Accuracy::none()),
            8,
        )
    }

    #[test]
    fn test_new_session_is_unavailable() {
        let s = session();
        assert_eq!(s.status(), SessionStatus::Unavailable);
        assert!(s.last_update.is_none());
    }

    #[test]
    fn test_bound_wins_over_activating() {
        let mut s = session();
        s.activating = Some("wifi".into());
        assert_eq!(
            s.status(),
            SessionStatus::Activating {
                provider_id: "wifi".into()
            }
        );
        s.bound = Some("gps".into());
        s.activating = None;
        assert_eq!(
            s.status(),
            SessionStatus::Active {
                provider_id: "gps".into()
            }
        );
    }
}
