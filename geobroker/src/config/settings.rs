//! Broker settings: pure data, no parsing logic.

use std::time::Duration;

/// Default timeout for provider activation.
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a single provider method call.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default grace period before an Unavailable provider is abandoned.
pub const DEFAULT_UNAVAILABLE_GRACE: Duration = Duration::from_secs(10);

/// Default capacity of the broker command channel.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Default per-session update queue depth.
///
/// Updates supersede each other, so a slow client only ever loses the
/// oldest entries.
pub const DEFAULT_SESSION_UPDATE_CAPACITY: usize = 32;

/// Tunable broker parameters, the `[broker]` section of config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// How long an activation (connect + readiness probe) may take.
    pub activation_timeout: Duration,
    /// How long a single provider method call may take.
    pub invoke_timeout: Duration,
    /// How long a bound provider may stay Unavailable before the broker
    /// re-selects away from it.
    pub unavailable_grace: Duration,
    /// Capacity of the command channel into the broker actor.
    pub command_channel_capacity: usize,
    /// Capacity of each session's update relay channel.
    pub session_update_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            unavailable_grace: DEFAULT_UNAVAILABLE_GRACE,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
            session_update_capacity: DEFAULT_SESSION_UPDATE_CAPACITY,
        }
    }
}

impl BrokerSettings {
    /// Set the activation timeout.
    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Set the invoke timeout.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Set the Unavailable grace period.
    pub fn with_unavailable_grace(mut self, grace: Duration) -> Self {
        self.unavailable_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.activation_timeout, DEFAULT_ACTIVATION_TIMEOUT);
        assert_eq!(settings.invoke_timeout, DEFAULT_INVOKE_TIMEOUT);
        assert_eq!(settings.unavailable_grace, DEFAULT_UNAVAILABLE_GRACE);
        assert_eq!(settings.command_channel_capacity, DEFAULT_COMMAND_CHANNEL_CAPACITY);
        assert_eq!(settings.session_update_capacity, DEFAULT_SESSION_UPDATE_CAPACITY);
    }

    #[test]
    fn test_builder() {
        let settings = BrokerSettings::default()
            .with_activation_timeout(Duration::from_millis(100))
            .with_invoke_timeout(Duration::from_millis(200))
            .with_unavailable_grace(Duration::from_millis(300));
        assert_eq!(settings.activation_timeout, Duration::from_millis(100));
        assert_eq!(settings.invoke_timeout, Duration::from_millis(200));
        assert_eq!(settings.unavailable_grace, Duration::from_millis(300));
    }
}
