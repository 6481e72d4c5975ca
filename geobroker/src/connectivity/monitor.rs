//! Connectivity monitor: de-duplication and fan-out of state transitions.
//!
//! The underlying network status source (an OS network-manager style signal)
//! is a black box that pushes raw states. The monitor's job is to drop
//! repeated identical states, keep a current snapshot, and fan transitions
//! out to multiple independent subscribers in delivery order.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ConnectivityEvent, ConnectivityState};

/// Capacity of the transition fan-out channel.
///
/// Connectivity transitions are rare; a lagging subscriber losing the oldest
/// transition still converges because the latest state supersedes it.
const FANOUT_CAPACITY: usize = 16;

/// Tracks network reachability and fans out state transitions.
///
/// The monitor is a passive shared structure: an external source pushes raw
/// states via [`publish`](Self::publish) (or through a pump attached with
/// [`attach_source`](Self::attach_source)), and any number of consumers read
/// the current state or subscribe to transitions.
///
/// If the underlying source is unreachable the state is
/// [`ConnectivityState::Unknown`], never an error.
pub struct ConnectivityMonitor {
    inner: Mutex<MonitorInner>,
}

struct MonitorInner {
    current: ConnectivityEvent,
    fanout: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor with no source attached; state starts Unknown.
    pub fn new() -> Self {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            inner: Mutex::new(MonitorInner {
                current: ConnectivityEvent::default(),
                fanout,
            }),
        }
    }

    /// Current reachability state.
    ///
    /// The full current event, attachment facts included, arrives as the
    /// first value of a [`subscribe`](Self::subscribe) stream.
    pub fn current_state(&self) -> ConnectivityState {
        self.inner.lock().expect("monitor lock poisoned").current.state
    }

    /// Push a raw state from the underlying source.
    ///
    /// Consecutive identical events are dropped. Returns true if the event
    /// was an actual transition and was fanned out.
    pub fn publish(&self, event: ConnectivityEvent) -> bool {
        let mut inner = self.inner.lock().expect("monitor lock poisoned");
        if inner.current == event {
            return false;
        }
        info!(
            from = %inner.current.state,
            to = %event.state,
            access_point = event.access_point.as_deref().unwrap_or("-"),
            "Connectivity transition"
        );
        inner.current = event.clone();
        // No receivers is fine: the snapshot is still updated.
        let _ = inner.fanout.send(event);
        true
    }

    /// Subscribe to connectivity transitions.
    ///
    /// The first delivered value is the current state at subscription time;
    /// after that, one value per actual transition. Taking the snapshot and
    /// the fan-out receiver under one lock keeps the two consistent: no
    /// transition is missed or observed twice across the seam.
    pub fn subscribe(&self) -> ConnectivityEvents {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        ConnectivityEvents {
            first: Some(inner.current.clone()),
            rx: inner.fanout.subscribe(),
        }
    }

    /// Attach a push-style source, spawning a pump that forwards its events.
    ///
    /// When the source channel closes the monitor falls back to Unknown,
    /// since nothing can vouch for the network anymore.
    pub fn attach_source(
        self: &Arc<Self>,
        mut source: mpsc::Receiver<ConnectivityEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        debug!("Connectivity source pump shutting down");
                        break;
                    }

                    event = source.recv() => {
                        match event {
                            Some(event) => {
                                monitor.publish(event);
                            }
                            None => {
                                debug!("Connectivity source closed, falling back to Unknown");
                                monitor.publish(ConnectivityEvent::default());
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of connectivity transitions for one subscriber.
///
/// Yields the subscription-time snapshot first, then one event per
/// transition. A subscriber that lags loses the oldest transitions but
/// always converges on the latest state.
pub struct ConnectivityEvents {
    first: Option<ConnectivityEvent>,
    rx: broadcast::Receiver<ConnectivityEvent>,
}

impl ConnectivityEvents {
    /// Receive the next connectivity event.
    ///
    /// Returns `None` once the monitor has been dropped.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Connectivity subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, `None` if no event is pending.
    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state(state: ConnectivityState) -> ConnectivityEvent {
        ConnectivityEvent::state_only(state)
    }

    #[test]
    fn test_initial_state_unknown() {
        let monitor = ConnectivityMonitor::new();
        assert_eq!(monitor.current_state(), ConnectivityState::Unknown);
    }

    #[test]
    fn test_publish_updates_current() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.publish(state(ConnectivityState::Online)));
        assert_eq!(monitor.current_state(), ConnectivityState::Online);
    }

    #[test]
    fn test_duplicate_states_are_dropped() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.publish(state(ConnectivityState::Offline)));
        assert!(!monitor.publish(state(ConnectivityState::Offline)));
        assert!(monitor.publish(state(ConnectivityState::Online)));
    }

    #[test]
    fn test_attachment_change_is_a_transition() {
        // Same Online state but a different access point is a real change.
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.publish(ConnectivityEvent::online("ap-1", "gw-1")));
        assert!(monitor.publish(ConnectivityEvent::online("ap-2", "gw-1")));
    }

    #[tokio::test]
    async fn test_subscriber_sees_current_state_first() {
        let monitor = ConnectivityMonitor::new();
        monitor.publish(state(ConnectivityState::Online));

        let mut events = monitor.subscribe();
        let first = events.recv().await.expect("snapshot");
        assert_eq!(first.state, ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_subscriber_sees_each_transition_once() {
        let monitor = ConnectivityMonitor::new();
        let mut events = monitor.subscribe();

        monitor.publish(state(ConnectivityState::Offline));
        monitor.publish(state(ConnectivityState::Offline)); // dup, dropped
        monitor.publish(state(ConnectivityState::Acquiring));
        monitor.publish(state(ConnectivityState::Online));

        assert_eq!(events.recv().await.unwrap().state, ConnectivityState::Unknown);
        assert_eq!(events.recv().await.unwrap().state, ConnectivityState::Offline);
        assert_eq!(events.recv().await.unwrap().state, ConnectivityState::Acquiring);
        assert_eq!(events.recv().await.unwrap().state, ConnectivityState::Online);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_independent_subscribers() {
        let monitor = ConnectivityMonitor::new();
        let mut a = monitor.subscribe();
        monitor.publish(state(ConnectivityState::Online));
        let mut b = monitor.subscribe();

        // a sees Unknown snapshot then the transition; b only the snapshot.
        assert_eq!(a.recv().await.unwrap().state, ConnectivityState::Unknown);
        assert_eq!(a.recv().await.unwrap().state, ConnectivityState::Online);
        assert_eq!(b.recv().await.unwrap().state, ConnectivityState::Online);
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_source_close_falls_back_to_unknown() {
        let monitor = Arc::new(ConnectivityMonitor::new());
        let (tx, rx) = mpsc::channel(4);
        let pump = monitor.attach_source(rx, CancellationToken::new());

        tx.send(state(ConnectivityState::Online)).await.unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("pump should exit when source closes")
            .unwrap();
        assert_eq!(monitor.current_state(), ConnectivityState::Unknown);
    }

    #[tokio::test]
    async fn test_source_pump_respects_shutdown() {
        let monitor = Arc::new(ConnectivityMonitor::new());
        let (_tx, rx) = mpsc::channel::<ConnectivityEvent>(4);
        let shutdown = CancellationToken::new();
        let pump = monitor.attach_source(rx, shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("pump should exit on shutdown")
            .unwrap();
    }
}
