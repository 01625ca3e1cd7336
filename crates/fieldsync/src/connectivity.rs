//! Connectivity monitor.
//!
//! The platform's network signal is pushed in through [`ConnectivityMonitor::report`];
//! nothing here polls. Consumers read [`current`](ConnectivityMonitor::current)
//! at decision time or subscribe to transitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Process-wide network state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            NetworkState::Online
        } else {
            NetworkState::Offline
        }
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Online => f.write_str("online"),
            NetworkState::Offline => f.write_str("offline"),
        }
    }
}

/// Holds the current [`NetworkState`] and fans out transitions.
///
/// Cloning is cheap; all clones share one state. The state is only a hint:
/// a delivery attempt is still the ground truth for reachability.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<NetworkState>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor seeded with the platform's boot value.
    pub fn new(initial: NetworkState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> NetworkState {
        *self.sender.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Feeds a state from the platform signal. Repeating the current state is
    /// dropped. Returns `true` if this was a transition.
    pub fn report(&self, state: NetworkState) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            log::info!("Connectivity changed: now {}", state);
        }
        changed
    }

    /// Receiver that wakes on every transition after this call.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.sender.subscribe()
    }

    /// Calls `callback` once per transition, on a spawned task.
    ///
    /// Flaps that settle back before the task observes them are collapsed, so
    /// the callback never sees the same state twice in a row. The callback
    /// must not block; dispatch heavier work elsewhere.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(NetworkState) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let mut last = *receiver.borrow_and_update();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let state = *receiver.borrow_and_update();
                if state != last {
                    last = state;
                    callback(state);
                }
            }
        })
    }
}
