//! Connectivity signal
//!
//! Wraps the host runtime's online/offline notifications into a boolean
//! with change events. Purely advisory: a `true` reading means an
//! attempt is warranted, not that requests will succeed. There is no
//! polling - the host feeds transitions in via `set_online`.

use tokio::sync::watch;
use tracing::debug;

/// Shared online/offline state with transition events
#[derive(Clone)]
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ConnectivitySignal {
    /// Create a signal with an initial state
    pub fn new(online: bool) -> Self {
        let (tx, rx) = watch::channel(online);
        Self { tx, rx }
    }

    /// Current reading
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Record a transition from the host's connectivity events
    ///
    /// Repeated identical readings are not re-broadcast.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(online, "connectivity changed");
        }
    }

    /// Subscribe to transition events
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivitySignal::new(true).is_online());
        assert!(!ConnectivitySignal::new(false).is_online());
    }

    #[tokio::test]
    async fn test_transitions_are_observed() {
        let signal = ConnectivitySignal::new(false);
        let mut rx = signal.subscribe();

        signal.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        signal.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_duplicate_readings_not_rebroadcast() {
        let signal = ConnectivitySignal::new(true);
        let mut rx = signal.subscribe();
        rx.borrow_and_update();

        signal.set_online(true);
        assert!(!rx.has_changed().unwrap());

        signal.set_online(false);
        assert!(rx.has_changed().unwrap());
    }
}
