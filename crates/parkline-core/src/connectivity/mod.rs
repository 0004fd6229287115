//! Connectivity monitor and reachability probe.
//!
//! The monitor holds the last observed network state plus the operator's
//! forced-offline override, and publishes edges of the effective state
//! (`online && !forced_offline`) to subscribers. It never retries anything.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Snapshot of connectivity as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    /// Last reachability observation from the platform or probe
    pub online: bool,
    /// Operator override that keeps the engine offline regardless of the network
    pub forced_offline: bool,
}

impl ConnectivityState {
    /// Whether remote calls should be attempted
    #[must_use]
    pub const fn is_effectively_online(self) -> bool {
        self.online && !self.forced_offline
    }
}

/// Edge of the effective online state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    CameOnline,
    WentOffline,
}

impl ConnectivityEvent {
    const fn between(before: ConnectivityState, after: ConnectivityState) -> Option<Self> {
        match (before.is_effectively_online(), after.is_effectively_online()) {
            (false, true) => Some(Self::CameOnline),
            (true, false) => Some(Self::WentOffline),
            _ => None,
        }
    }
}

/// Process-scoped connectivity state shared by the engine and its callers
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with an initial reachability observation
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(ConnectivityState {
            online,
            forced_offline: false,
        });
        Self {
            state: Arc::new(state),
        }
    }

    /// Current snapshot
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Online and not forced offline
    pub fn is_online(&self) -> bool {
        self.state().is_effectively_online()
    }

    /// Record a platform reachability transition
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        self.update(|state| state.online = online)
    }

    /// Set or clear the forced-offline override
    pub fn set_forced_offline(&self, forced_offline: bool) -> Option<ConnectivityEvent> {
        self.update(|state| state.forced_offline = forced_offline)
    }

    /// Stream of effective-state edges starting from the current state.
    ///
    /// Rapid flips between two polls collapse into the net change.
    pub fn subscribe(&self) -> ConnectivityEvents {
        let receiver = self.state.subscribe();
        let last_online = receiver.borrow().is_effectively_online();
        ConnectivityEvents {
            receiver,
            last_online,
        }
    }

    fn update(&self, change: impl FnOnce(&mut ConnectivityState)) -> Option<ConnectivityEvent> {
        let mut event = None;
        self.state.send_if_modified(|state| {
            let before = *state;
            change(state);
            event = ConnectivityEvent::between(before, *state);
            before != *state
        });

        if let Some(event) = event {
            tracing::info!(?event, "Connectivity changed");
        }
        event
    }
}

/// Subscriber side of `ConnectivityMonitor`
pub struct ConnectivityEvents {
    receiver: watch::Receiver<ConnectivityState>,
    last_online: bool,
}

impl ConnectivityEvents {
    /// Wait for the next edge; `None` once every monitor handle is dropped
    pub async fn next(&mut self) -> Option<ConnectivityEvent> {
        loop {
            self.receiver.changed().await.ok()?;
            let online = self.receiver.borrow_and_update().is_effectively_online();
            if online != self.last_online {
                self.last_online = online;
                return Some(if online {
                    ConnectivityEvent::CameOnline
                } else {
                    ConnectivityEvent::WentOffline
                });
            }
        }
    }
}

/// Periodic reachability check against the remote API.
///
/// Any HTTP response counts as reachable; transport failures and timeouts
/// count as offline.
pub struct ConnectivityProbe {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build probe HTTP client: {error}")))?;
        Ok(Self {
            url: url.into(),
            interval,
            client,
        })
    }

    /// One reachability observation
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                tracing::trace!(status = %response.status(), "Probe reached remote");
                true
            }
            Err(error) => {
                tracing::debug!("Probe failed: {error}");
                false
            }
        }
    }

    /// Feed observations into `monitor` forever
    pub async fn run(&self, monitor: &ConnectivityMonitor) {
        loop {
            monitor.set_online(self.check().await);
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_offline_masks_network_state() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());

        assert_eq!(
            monitor.set_forced_offline(true),
            Some(ConnectivityEvent::WentOffline)
        );
        assert!(!monitor.is_online());
        assert!(monitor.state().online);

        // Network flaps are invisible while forced offline
        assert_eq!(monitor.set_online(false), None);
        assert_eq!(monitor.set_online(true), None);

        assert_eq!(
            monitor.set_forced_offline(false),
            Some(ConnectivityEvent::CameOnline)
        );
    }

    #[test]
    fn repeated_observation_is_not_an_edge() {
        let monitor = ConnectivityMonitor::new(false);
        assert_eq!(monitor.set_online(false), None);
        assert_eq!(monitor.set_online(true), Some(ConnectivityEvent::CameOnline));
        assert_eq!(monitor.set_online(true), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscriber_sees_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        monitor.set_online(true);
        assert_eq!(events.next().await, Some(ConnectivityEvent::CameOnline));

        monitor.set_online(false);
        assert_eq!(events.next().await, Some(ConnectivityEvent::WentOffline));

        drop(monitor);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_reports_unreachable_as_offline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = ConnectivityProbe::new(
            format!("http://{addr}"),
            Duration::from_millis(500),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!probe.check().await);
    }
}
