//! Channel-backed client surface for the broker actor.

use std::collections::BTreeMap;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::error::BrokerError;
use super::session::{SessionId, SessionStatus};
use crate::catalog::Capability;
use crate::provider::ProviderUpdate;
use crate::selector::SessionCriteria;

/// Commands the actor accepts. One oneshot reply per command.
pub(super) enum BrokerCommand {
    OpenSession {
        capability: Capability,
        criteria: SessionCriteria,
        reply: oneshot::Sender<SessionId>,
    },
    SessionStatus {
        session: SessionId,
        reply: oneshot::Sender<Result<SessionStatus, BrokerError>>,
    },
    GetCurrent {
        session: SessionId,
        reply: oneshot::Sender<Result<ProviderUpdate, BrokerError>>,
    },
    Subscribe {
        session: SessionId,
        reply: oneshot::Sender<Result<broadcast::Receiver<ProviderUpdate>, BrokerError>>,
    },
    SetOptions {
        session: SessionId,
        options: BTreeMap<String, String>,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    CloseSession {
        session: SessionId,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for talking to a running broker.
///
/// Every method is a command round-trip to the actor; calls after the
/// broker shuts down fail with [`BrokerError::ChannelClosed`].
#[derive(Clone)]
pub struct BrokerClient {
    commands: mpsc::Sender<BrokerCommand>,
}

impl BrokerClient {
    pub(super) fn new(commands: mpsc::Sender<BrokerCommand>) -> Self {
        Self { commands }
    }

    /// True while the broker actor is accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Open a session for `capability` under `criteria`.
    ///
    /// Always succeeds while the broker runs, even when no provider is
    /// currently eligible; query [`session_status`](Self::session_status)
    /// to see whether a provider is bound.
    pub async fn open_session(
        &self,
        capability: Capability,
        criteria: SessionCriteria,
    ) -> Result<SessionId, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::OpenSession {
            capability,
            criteria,
            reply,
        })
        .await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Current binding state of a session.
    pub async fn session_status(&self, session: SessionId) -> Result<SessionStatus, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::SessionStatus { session, reply }).await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)?
    }

    /// Current value for the session's capability.
    ///
    /// Serves the cached last update when one exists, otherwise performs a
    /// live fetch against the bound provider. Fails with
    /// [`BrokerError::NoCandidate`] when the session has neither.
    pub async fn get_current(&self, session: SessionId) -> Result<ProviderUpdate, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::GetCurrent { session, reply }).await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)?
    }

    /// Subscribe to the session's update stream.
    ///
    /// The stream survives provider rebinds; a lagging subscriber loses the
    /// oldest updates, never the newest.
    pub async fn subscribe(
        &self,
        session: SessionId,
    ) -> Result<broadcast::Receiver<ProviderUpdate>, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::Subscribe { session, reply }).await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)?
    }

    /// Set session options, forwarded to the bound provider and re-applied
    /// on every rebind.
    pub async fn set_options(
        &self,
        session: SessionId,
        options: BTreeMap<String, String>,
    ) -> Result<(), BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::SetOptions {
            session,
            options,
            reply,
        })
        .await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)?
    }

    /// Close a session. Closing an unknown or already-closed session is a
    /// no-op, not an error.
    pub async fn close_session(&self, session: SessionId) -> Result<(), BrokerError> {
        let (reply, response) = oneshot::channel();
        self.send(BrokerCommand::CloseSession { session, reply }).await?;
        response.await.map_err(|_| BrokerError::ChannelClosed)
    }

    async fn send(&self, command: BrokerCommand) -> Result<(), BrokerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BrokerError::ChannelClosed)
    }
}
