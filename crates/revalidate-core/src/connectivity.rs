// ── Connectivity oracle ──
//
// Queried synchronously before every network attempt. Platform
// reachability detection lives outside this crate; it only has to flip
// a `ConnectivityFlag` or implement the trait.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers "may we try the network right now?".
pub trait Connectivity: Send + Sync {
    fn is_network_available(&self) -> bool;
}

impl<F> Connectivity for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_network_available(&self) -> bool {
        self()
    }
}

/// Settable connectivity state, `true` (online) by default.
#[derive(Debug)]
pub struct ConnectivityFlag(AtomicBool);

impl ConnectivityFlag {
    pub fn new(available: bool) -> Self {
        Self(AtomicBool::new(available))
    }

    pub fn set_available(&self, available: bool) {
        self.0.store(available, Ordering::Release);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_network_available(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
