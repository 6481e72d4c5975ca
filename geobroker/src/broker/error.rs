//! Broker-level errors.

use thiserror::Error;

use super::session::SessionId;
use crate::transport::TransportError;

/// Errors a broker client can observe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// No eligible provider for the session's capability and criteria.
    ///
    /// This is a state, not a fault: the session stays open and the broker
    /// retries on the next catalog or connectivity change.
    #[error("No capable provider currently available")]
    NoCandidate,

    /// The session id does not name an open session.
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Activation of a selected provider failed.
    #[error("Provider activation failed: {0}")]
    ActivationFailed(String),

    /// A provider method call exceeded its timeout.
    #[error("Provider call timed out")]
    Timeout,

    /// The provider rejected or mishandled a method call.
    #[error("Provider error: {0}")]
    Remote(String),

    /// The transport to the provider dropped mid-call.
    #[error("Provider disconnected")]
    Disconnected,

    /// The broker actor is no longer running.
    #[error("Broker is shut down")]
    ChannelClosed,
}

impl From<TransportError> for BrokerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(message) => Self::ActivationFailed(message),
            // A handle refusing calls is indistinguishable from a stall to
            // the client; both mean "retry elsewhere".
            TransportError::Unavailable | TransportError::Timeout => Self::Timeout,
            TransportError::Remote(message) => Self::Remote(message),
            TransportError::Disconnected => Self::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            BrokerError::from(TransportError::Connect("refused".into())),
            BrokerError::ActivationFailed("refused".into())
        );
        assert_eq!(BrokerError::from(TransportError::Timeout), BrokerError::Timeout);
        assert_eq!(BrokerError::from(TransportError::Unavailable), BrokerError::Timeout);
        assert_eq!(
            BrokerError::from(TransportError::Disconnected),
            BrokerError::Disconnected
        );
    }
}
