//! Network reachability signal.

use tokio::sync::watch;
use tracing::info;

/// Shared online/offline flag that observers can await changes on.
///
/// The platform layer calls [`NetworkMonitor::set_online`]; the reconnect
/// trigger subscribes and reacts to offline-to-online edges.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update reachability. Observers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Network is now {}", if online { "online" } else { "offline" });
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edges_wake_subscribers() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow_and_update());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }

    #[test]
    fn test_repeated_value_is_not_a_change() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
    }
}
