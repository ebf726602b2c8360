//! Connectivity signal.
//!
//! The router polls [`ConnectivitySignal::is_online`] at the start of every
//! `Adaptive` call; the reconnect trigger polls it on an interval. Nothing is
//! pushed, so implementations only need a cheap, non-blocking read.

use std::sync::atomic::{AtomicBool, Ordering};

/// External collaborator reporting whether the cloud is believed reachable.
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity flag flipped by the host (OS reachability callback, tests).
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
}

impl ManualConnectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_connectivity_toggles() {
        let signal = ManualConnectivity::default();
        assert!(signal.is_online());

        signal.set_online(false);
        assert!(!signal.is_online());
    }
}
