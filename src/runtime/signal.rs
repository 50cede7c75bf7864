//! One-way stop signal from the controller to the event loop.
//!
//! The flag is always set before waking. The loop installs its waker first
//! and checks the flag before every poll, so a stop issued at any point
//! (even before the loop has a poller) is observed on the next iteration.

use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Default)]
struct Shared {
    requested: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
}

/// Cloneable handle; one side calls `request`, the loop polls `is_requested`.
#[derive(Clone, Default)]
pub struct StopSignal {
    shared: Arc<Shared>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Safe to call from any thread, any number of times.
    pub fn request(&self) {
        self.shared.requested.store(true, Ordering::SeqCst);

        let waker = self
            .shared
            .waker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(waker) = waker {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "Failed to wake event loop");
            }
        }
    }

    pub fn is_requested(&self) -> bool {
        self.shared.requested.load(Ordering::SeqCst)
    }

    /// Attach the poller's waker. Called by the loop before its first check.
    pub(crate) fn install(&self, waker: Waker) {
        let mut slot = self
            .shared
            .waker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(waker));
    }

    /// Drop the waker once the poller is gone.
    pub(crate) fn uninstall(&self) {
        self.shared
            .waker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}
