//! The broker actor: sequential owner of sessions and provider handles.
//!
//! All state transitions happen inside `run`'s select loop. Anything slow
//! (activation, provider calls, grace timers) runs in spawned workers that
//! report back through the event channel, so a stalled provider can never
//! block selection or another session's commands.
//!
//! Activation is shared: at most one activation worker runs per provider,
//! tracked in the pending map with the sessions waiting on it. A session
//! that selects a provider mid-activation joins the waiter list instead of
//! spawning a second connection; a session that moves on simply stops
//! waiting, and a finished activation nobody waits for is shut down.
//! Grace timers carry the slot's grace epoch and are dropped when the epoch
//! no longer matches.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::BrokerCommand;
use super::error::BrokerError;
use super::session::{SessionId, SessionState};
use crate::catalog::{Capability, ProviderCatalog};
use crate::config::BrokerSettings;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::provider::{HandleStatus, ProviderHandle, ProviderUpdate};
use crate::selector::{self, SessionCriteria};
use crate::transport::{ProviderRequest, ProviderTransport, TransportError};

/// Events produced by worker tasks for the actor loop.
enum BrokerEvent {
    /// The single activation worker for a provider finished.
    ActivationFinished {
        provider_id: String,
        result: Result<ProviderHandle, TransportError>,
    },
    /// A shared handle changed status.
    HandleStatus {
        provider_id: String,
        status: HandleStatus,
    },
    /// A shared handle delivered an update.
    HandleUpdate {
        provider_id: String,
        update: ProviderUpdate,
    },
    /// A grace timer for an Unavailable provider ran out.
    GraceExpired { provider_id: String, epoch: u64 },
    /// A live fetch against a bound provider failed retryably.
    ProviderTrouble {
        session: SessionId,
        provider_id: String,
        error: TransportError,
    },
}

/// One activated provider, shared by every session bound to it.
struct HandleSlot {
    handle: Arc<ProviderHandle>,
    /// Number of sessions bound to this handle.
    refs: usize,
    /// Stops the broker-side event pump when the slot is dropped.
    pump_shutdown: CancellationToken,
    /// Invalidates outstanding grace timers when bumped.
    grace_epoch: u64,
}

pub(super) struct BrokerActor {
    catalog: Arc<dyn ProviderCatalog>,
    transport: Arc<dyn ProviderTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    settings: BrokerSettings,
    sessions: HashMap<SessionId, SessionState>,
    handles: HashMap<String, HandleSlot>,
    /// Providers with an activation in flight, with the sessions waiting.
    ///
    /// A waiter entry is only honored while the session still has this
    /// provider in `activating`; sessions that moved on are skipped when
    /// the activation completes.
    pending: HashMap<String, Vec<SessionId>>,
    next_session_id: SessionId,
    events_tx: mpsc::Sender<BrokerEvent>,
    events_rx: Option<mpsc::Receiver<BrokerEvent>>,
}

impl BrokerActor {
    pub fn new(
        catalog: Arc<dyn ProviderCatalog>,
        transport: Arc<dyn ProviderTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        settings: BrokerSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.command_channel_capacity);
        Self {
            catalog,
            transport,
            connectivity,
            settings,
            sessions: HashMap::new(),
            handles: HashMap::new(),
            pending: HashMap::new(),
            next_session_id: 1,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<BrokerCommand>, shutdown: CancellationToken) {
        info!("Broker actor started");

        let mut events = self.events_rx.take().expect("broker actor run twice");
        let mut connectivity = self.connectivity.subscribe();
        // The subscription delivers the current state first; the loop only
        // cares about transitions.
        let _ = connectivity.try_recv();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Broker actor shutting down");
                    break;
                }

                Some(command) = commands.recv() => {
                    self.handle_command(command);
                }

                Some(event) = events.recv() => {
                    self.handle_event(event);
                }

                Some(event) = connectivity.recv() => {
                    self.on_connectivity(event);
                }
            }
        }

        self.sessions.clear();
        self.pending.clear();
        for (provider_id, slot) in self.handles.drain() {
            debug!(provider_id = %provider_id, "Releasing provider on shutdown");
            slot.pump_shutdown.cancel();
            slot.handle.shutdown();
        }
        info!("Broker actor stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::OpenSession {
                capability,
                criteria,
                reply,
            } => {
                let id = self.open_session(capability, criteria);
                let _ = reply.send(id);
            }
            BrokerCommand::SessionStatus { session, reply } => {
                let result = self
                    .sessions
                    .get(&session)
                    .map(|s| s.status())
                    .ok_or(BrokerError::UnknownSession(session));
                let _ = reply.send(result);
            }
            BrokerCommand::GetCurrent { session, reply } => {
                self.get_current(session, reply);
            }
            BrokerCommand::Subscribe { session, reply } => {
                let result = self
                    .sessions
                    .get(&session)
                    .map(|s| s.updates_tx.subscribe())
                    .ok_or(BrokerError::UnknownSession(session));
                let _ = reply.send(result);
            }
            BrokerCommand::SetOptions {
                session,
                options,
                reply,
            } => {
                self.set_options(session, options, reply);
            }
            BrokerCommand::CloseSession { session, reply } => {
                self.close_session(session);
                let _ = reply.send(());
            }
        }
    }

    fn open_session(&mut self, capability: Capability, criteria: SessionCriteria) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;

        let session = SessionState::new(capability, criteria, self.settings.session_update_capacity);
        self.sessions.insert(id, session);
        info!(session = id, capability = %capability, "Session opened");

        self.rerank_session(id);
        self.try_bind(id);
        id
    }

    fn close_session(&mut self, id: SessionId) {
        let Some(session) = self.sessions.remove(&id) else {
            debug!(session = id, "Ignoring close of unknown session");
            return;
        };
        // A pending activation self-cancels: on completion the session is
        // gone, so it no longer counts as a waiter.
        if let Some(provider_id) = session.bound {
            self.release_provider(&provider_id);
        }
        info!(session = id, "Session closed");
    }

    fn get_current(
        &mut self,
        id: SessionId,
        reply: oneshot::Sender<Result<ProviderUpdate, BrokerError>>,
    ) {
        let Some(session) = self.sessions.get(&id) else {
            let _ = reply.send(Err(BrokerError::UnknownSession(id)));
            return;
        };
        if let Some(update) = session.last_update.clone() {
            let _ = reply.send(Ok(update));
            return;
        }
        let handle = session
            .bound
            .as_ref()
            .and_then(|provider_id| self.handles.get(provider_id))
            .map(|slot| Arc::clone(&slot.handle));
        let Some(handle) = handle else {
            let _ = reply.send(Err(BrokerError::NoCandidate));
            return;
        };

        // Live fetch off the actor. A fetched value is relayed like a
        // pushed update so the session cache and subscribers see it; a
        // retryable failure additionally triggers re-selection.
        let capability = session.capability;
        let timeout = self.settings.invoke_timeout;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match handle.get_fix(capability, timeout).await {
                Ok(update) => {
                    let _ = events
                        .send(BrokerEvent::HandleUpdate {
                            provider_id: handle.provider_id().to_string(),
                            update: update.clone(),
                        })
                        .await;
                    let _ = reply.send(Ok(update));
                }
                Err(error) => {
                    if error.is_retryable_elsewhere() {
                        let _ = events
                            .send(BrokerEvent::ProviderTrouble {
                                session: id,
                                provider_id: handle.provider_id().to_string(),
                                error: error.clone(),
                            })
                            .await;
                    }
                    let _ = reply.send(Err(BrokerError::from(error)));
                }
            }
        });
    }

    fn set_options(
        &mut self,
        id: SessionId,
        options: std::collections::BTreeMap<String, String>,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    ) {
        let Some(session) = self.sessions.get_mut(&id) else {
            let _ = reply.send(Err(BrokerError::UnknownSession(id)));
            return;
        };
        session.options = options.clone();

        let handle = session
            .bound
            .as_ref()
            .and_then(|provider_id| self.handles.get(provider_id))
            .map(|slot| Arc::clone(&slot.handle));
        let Some(handle) = handle else {
            // Stored; applied when a provider binds.
            let _ = reply.send(Ok(()));
            return;
        };

        let timeout = self.settings.invoke_timeout;
        tokio::spawn(async move {
            let result = handle
                .invoke(ProviderRequest::SetOptions(options), timeout)
                .await
                .map(|_| ())
                .map_err(BrokerError::from);
            let _ = reply.send(result);
        });
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::ActivationFinished {
                provider_id,
                result,
            } => self.on_activation_finished(provider_id, result),
            BrokerEvent::HandleStatus {
                provider_id,
                status,
            } => self.on_handle_status(&provider_id, status),
            BrokerEvent::HandleUpdate {
                provider_id,
                update,
            } => self.on_handle_update(&provider_id, update),
            BrokerEvent::GraceExpired { provider_id, epoch } => {
                self.on_grace_expired(&provider_id, epoch)
            }
            BrokerEvent::ProviderTrouble {
                session,
                provider_id,
                error,
            } => self.on_provider_trouble(session, &provider_id, error),
        }
    }

    fn on_activation_finished(
        &mut self,
        provider_id: String,
        result: Result<ProviderHandle, TransportError>,
    ) {
        // Honor only waiters that are still waiting on this provider;
        // closed sessions and sessions that moved on are skipped.
        let waiters: Vec<SessionId> = self
            .pending
            .remove(&provider_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|id| {
                self.sessions
                    .get(id)
                    .map(|s| s.activating.as_deref() == Some(provider_id.as_str()))
                    .unwrap_or(false)
            })
            .collect();

        match result {
            Ok(handle) => {
                if waiters.is_empty() {
                    debug!(provider_id = %provider_id, "Discarding activation nobody waits for");
                    handle.shutdown();
                    return;
                }
                // A live slot cannot coexist with a pending activation, but
                // a stale dead slot can; clear it before inserting.
                if self.handles.contains_key(&provider_id) {
                    self.fail_provider(&provider_id);
                }
                let slot = HandleSlot {
                    handle: Arc::new(handle),
                    refs: waiters.len(),
                    pump_shutdown: CancellationToken::new(),
                    grace_epoch: 0,
                };
                self.spawn_handle_pump(&provider_id, &slot);
                let activated_unavailable = slot.handle.status() == HandleStatus::Unavailable;
                self.handles.insert(provider_id.clone(), slot);
                if activated_unavailable {
                    self.start_grace(&provider_id);
                }
                for id in waiters {
                    self.bind_session(id, provider_id.clone());
                }
            }
            Err(error) => {
                warn!(
                    provider_id = %provider_id,
                    waiters = waiters.len(),
                    error = %error,
                    "Provider activation failed, trying next candidates"
                );
                for id in waiters {
                    let session = self.sessions.get_mut(&id).expect("waiter filtered above");
                    session.activating = None;
                    session.failed.insert(provider_id.clone());
                    self.try_bind(id);
                }
            }
        }
    }

    fn on_handle_status(&mut self, provider_id: &str, status: HandleStatus) {
        match status {
            HandleStatus::Activating | HandleStatus::Available => {
                // Recovery cancels any pending grace timer.
                if let Some(slot) = self.handles.get_mut(provider_id) {
                    slot.grace_epoch += 1;
                }
            }
            HandleStatus::Unavailable => self.start_grace(provider_id),
            HandleStatus::Error => self.fail_provider(provider_id),
        }
    }

    fn on_handle_update(&mut self, provider_id: &str, update: ProviderUpdate) {
        for session in self.sessions.values_mut() {
            if session.bound.as_deref() != Some(provider_id) {
                continue;
            }
            if update.capability != session.capability {
                continue;
            }
            session.last_update = Some(update.clone());
            // No subscribers is fine; the cached value still advances.
            let _ = session.updates_tx.send(update.clone());
        }
    }

    fn on_grace_expired(&mut self, provider_id: &str, epoch: u64) {
        let Some(slot) = self.handles.get(provider_id) else {
            return;
        };
        if slot.grace_epoch != epoch {
            // Recovered or superseded in the meantime.
            return;
        }
        if slot.handle.status() == HandleStatus::Unavailable {
            warn!(provider_id = %provider_id, "Provider stayed unavailable past grace period");
            self.fail_provider(provider_id);
        }
    }

    fn on_provider_trouble(&mut self, id: SessionId, provider_id: &str, error: TransportError) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.bound.as_deref() != Some(provider_id) {
            // The session already moved on.
            return;
        }
        warn!(
            session = id,
            provider_id = %provider_id,
            error = %error,
            "Provider call failed, re-selecting"
        );
        session.bound = None;
        session.failed.insert(provider_id.to_string());
        self.release_provider(provider_id);
        self.rerank_session(id);
        self.try_bind(id);
    }

    fn on_connectivity(&mut self, event: ConnectivityEvent) {
        info!(state = %event.state, "Connectivity changed, re-evaluating sessions");
        // Only sessions whose candidate set can change with connectivity
        // are touched; a deny-network session keeps its bindings and its
        // failed set.
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.criteria.network_sensitive())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.reevaluate(id);
        }
    }

    // ========================================================================
    // Selection and binding
    // ========================================================================

    /// Recompute the session's fallback queue from the catalog.
    fn rerank_session(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let capability = session.capability;
        let criteria = session.criteria.clone();
        let ranked = selector::rank(
            capability,
            &criteria,
            self.connectivity.current_state(),
            self.catalog.find_candidates(capability),
        );
        let session = self.sessions.get_mut(&id).expect("session present above");
        session.fallbacks = ranked
            .into_iter()
            .filter(|entry| !session.failed.contains(&entry.provider_id))
            .collect();
    }

    /// Bind the session to the best remaining candidate, if any.
    ///
    /// Reuses an already-activated handle when one exists and joins an
    /// in-flight activation when one is pending; only otherwise does it
    /// spawn an activation worker of its own.
    fn try_bind(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if session.bound.is_some() || session.activating.is_some() {
            return;
        }
        let Some(entry) = session.fallbacks.pop_front() else {
            debug!(session = id, "No capable provider currently");
            return;
        };
        let provider_id = entry.provider_id.clone();

        enum Slot {
            Live,
            Dead,
            Absent,
        }
        let slot = match self.handles.get(&provider_id) {
            Some(slot) if !slot.handle.status().is_terminal() => Slot::Live,
            Some(_) => Slot::Dead,
            None => Slot::Absent,
        };
        match slot {
            Slot::Live => {
                let slot = self.handles.get_mut(&provider_id).expect("slot checked above");
                slot.refs += 1;
                self.bind_session(id, provider_id);
                return;
            }
            Slot::Dead => {
                // The terminal status event has not been processed yet;
                // take the failure path now so bound sessions migrate
                // before this session re-activates the provider.
                self.fail_provider(&provider_id);
            }
            Slot::Absent => {}
        }

        let session = self.sessions.get_mut(&id).expect("session present above");
        session.activating = Some(provider_id.clone());

        if let Some(waiters) = self.pending.get_mut(&provider_id) {
            if !waiters.contains(&id) {
                waiters.push(id);
            }
            debug!(session = id, provider_id = %provider_id, "Joining in-flight activation");
            return;
        }

        self.pending.insert(provider_id.clone(), vec![id]);
        debug!(session = id, provider_id = %provider_id, "Activating provider for session");

        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();
        let timeout = self.settings.activation_timeout;
        tokio::spawn(async move {
            let result = ProviderHandle::activate(transport.as_ref(), entry, timeout).await;
            let _ = events
                .send(BrokerEvent::ActivationFinished {
                    provider_id,
                    result,
                })
                .await;
        });
    }

    /// Point the session at an activated handle. The caller has already
    /// accounted for the session's ref on the slot.
    fn bind_session(&mut self, id: SessionId, provider_id: String) {
        let handle = self
            .handles
            .get(&provider_id)
            .map(|slot| Arc::clone(&slot.handle));
        let Some(handle) = handle else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            self.release_provider(&provider_id);
            return;
        };

        session.bound = Some(provider_id.clone());
        session.activating = None;
        info!(session = id, provider_id = %provider_id, "Session bound to provider");

        // Seed a fresh session from the handle's cache so get_current and
        // subscribers see a value without waiting for the next signal.
        if session.last_update.is_none() {
            if let Some(update) = handle.last_update() {
                if update.capability == session.capability {
                    session.last_update = Some(update.clone());
                    let _ = session.updates_tx.send(update);
                }
            }
        }

        if !session.options.is_empty() {
            let options = session.options.clone();
            let timeout = self.settings.invoke_timeout;
            tokio::spawn(async move {
                if let Err(error) = handle
                    .invoke(ProviderRequest::SetOptions(options), timeout)
                    .await
                {
                    warn!(
                        provider_id = %handle.provider_id(),
                        error = %error,
                        "Failed to re-apply session options"
                    );
                }
            });
        }
    }

    /// Re-run selection for one session after a connectivity transition.
    ///
    /// New connectivity is new evidence: previously failed providers get
    /// another chance. A bound session only swaps providers on a strict
    /// accuracy improvement, or when the bound provider is no longer
    /// eligible at all.
    fn reevaluate(&mut self, id: SessionId) {
        {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            session.failed.clear();
            // Stop waiting on an in-flight activation; whoever else waits
            // keeps it alive, and a result nobody claims is shut down.
            session.activating = None;
        }
        self.rerank_session(id);

        let session = self.sessions.get(&id).expect("session present above");
        let Some(bound_id) = session.bound.clone() else {
            self.try_bind(id);
            return;
        };

        let bound_entry = self
            .handles
            .get(&bound_id)
            .map(|slot| slot.handle.entry().clone());
        let Some(bound_entry) = bound_entry else {
            return;
        };
        let still_eligible = selector::is_eligible(
            &bound_entry,
            session.capability,
            &session.criteria,
            self.connectivity.current_state(),
        );
        let top = session.fallbacks.front().cloned();

        match top {
            Some(top) if top.provider_id == bound_id => {
                // Bound provider is still the best choice; drop it from the
                // queue so a later failover skips straight past it.
                let session = self.sessions.get_mut(&id).expect("session present above");
                session.fallbacks.pop_front();
            }
            Some(top)
                if !still_eligible
                    || top.declared_accuracy.best > bound_entry.declared_accuracy.best =>
            {
                info!(
                    session = id,
                    from = %bound_id,
                    to = %top.provider_id,
                    "Rebinding session to better provider"
                );
                let session = self.sessions.get_mut(&id).expect("session present above");
                session.bound = None;
                self.release_provider(&bound_id);
                self.try_bind(id);
            }
            Some(_) => {
                // An equal-rank alternative exists; stay put.
            }
            None => {
                if !still_eligible {
                    info!(
                        session = id,
                        provider_id = %bound_id,
                        "Bound provider no longer eligible and no replacement, session unavailable"
                    );
                    let session = self.sessions.get_mut(&id).expect("session present above");
                    session.bound = None;
                    self.release_provider(&bound_id);
                }
            }
        }
    }

    // ========================================================================
    // Handle lifecycle
    // ========================================================================

    /// Forward one handle's status changes and updates into the event loop.
    fn spawn_handle_pump(&self, provider_id: &str, slot: &HandleSlot) {
        let provider_id = provider_id.to_string();
        let handle = Arc::clone(&slot.handle);
        let events = self.events_tx.clone();
        let shutdown = slot.pump_shutdown.clone();

        tokio::spawn(async move {
            let mut status = handle.status_stream();
            let mut updates = handle.subscribe();
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,

                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *status.borrow_and_update();
                        let event = BrokerEvent::HandleStatus {
                            provider_id: provider_id.clone(),
                            status: current,
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                        if current.is_terminal() {
                            break;
                        }
                    }

                    update = updates.recv() => {
                        match update {
                            Ok(update) => {
                                let event = BrokerEvent::HandleUpdate {
                                    provider_id: provider_id.clone(),
                                    update,
                                };
                                if events.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(provider_id = %provider_id, skipped, "Broker update pump lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    /// Arm the Unavailable grace timer for a provider.
    fn start_grace(&mut self, provider_id: &str) {
        let Some(slot) = self.handles.get_mut(provider_id) else {
            return;
        };
        slot.grace_epoch += 1;
        let epoch = slot.grace_epoch;
        let grace = self.settings.unavailable_grace;
        debug!(
            provider_id = %provider_id,
            grace_ms = grace.as_millis() as u64,
            "Provider unavailable, grace period started"
        );

        let provider_id = provider_id.to_string();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events
                .send(BrokerEvent::GraceExpired { provider_id, epoch })
                .await;
        });
    }

    /// Tear a provider down and move every bound session elsewhere.
    fn fail_provider(&mut self, provider_id: &str) {
        let Some(slot) = self.handles.remove(provider_id) else {
            return;
        };
        slot.pump_shutdown.cancel();
        slot.handle.shutdown();
        warn!(provider_id = %provider_id, "Provider failed, re-selecting for its sessions");

        let affected: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.bound.as_deref() == Some(provider_id))
            .map(|(id, _)| *id)
            .collect();
        for id in affected {
            let session = self.sessions.get_mut(&id).expect("session id collected above");
            session.bound = None;
            session.failed.insert(provider_id.to_string());
            self.rerank_session(id);
            self.try_bind(id);
        }
    }

    /// Drop one session's ref on a provider, shutting it down at zero.
    fn release_provider(&mut self, provider_id: &str) {
        let Some(slot) = self.handles.get_mut(provider_id) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            debug!(provider_id = %provider_id, "Last session released provider, shutting down");
            let slot = self.handles.remove(provider_id).expect("slot present above");
            slot.pump_shutdown.cancel();
            slot.handle.shutdown();
        }
    }
}
