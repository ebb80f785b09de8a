//! Active client session counter

use std::sync::{Arc, Mutex, PoisonError};

/// Count of concurrently active client sessions
///
/// Never goes below zero: unregistering with no active session is a no-op.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    active: Mutex<usize>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        tracing::info!("Connection registered. Active connections: {}", *active);
        *active
    }

    pub fn unregister(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        tracing::info!("Connection unregistered. Active connections: {}", *active);
        *active
    }

    pub fn active(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session that is unregistered when the guard drops
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        self.register();
        ConnectionGuard {
            counter: Arc::clone(self),
        }
    }
}

/// Keeps one session registered for its lifetime
#[must_use = "the session is unregistered as soon as the guard is dropped"]
pub struct ConnectionGuard {
    counter: Arc<ConnectionCounter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.unregister();
    }
}
