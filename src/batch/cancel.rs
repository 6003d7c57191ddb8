//! Cooperative cancellation.

use std::sync::{Arc, Mutex};

/// A one-way "please stop" flag shared between whoever started a batch and
/// the worker running it.
///
/// Once set, it stays set. The lock is only held long enough to read or
/// write the flag, never across slow work.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag {
    canceled: Arc<Mutex<bool>>,
}

impl CancellationFlag {
    /// Create a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling this more than once does nothing.
    pub fn set(&self) {
        let mut canceled = self.canceled.lock().expect("lock poisoned");
        *canceled = true;
    }

    /// Has cancellation been requested?
    pub fn is_set(&self) -> bool {
        *self.canceled.lock().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared_between_clones_and_stays_set() {
        let flag = CancellationFlag::new();
        let worker_view = flag.clone();
        assert!(!worker_view.is_set());
        flag.set();
        assert!(worker_view.is_set());
        flag.set();
        assert!(worker_view.is_set());
    }
}
