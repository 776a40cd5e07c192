// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
// (none)

/// Defers environment shutdown until removed.
///
/// A subsystem that must flush state before the environment goes down
/// installs a guard; `stop()` then only *requests* shutdown (notifying
/// every guard through [`StopGuard::stop`]) and the actual teardown
/// starts when the last guard is removed.
pub trait StopGuard: Send + Sync {
    /// Shutdown was requested; finish outstanding work and remove the
    /// guard.
    fn stop(&self);
}

#[derive(Default)]
struct RepoInner {
    guards: Vec<Arc<dyn StopGuard>>,
    stop_requested: bool,
}

/// The environment's set of installed stop guards.
#[derive(Default)]
pub(crate) struct StopGuardRepo {
    inner: Mutex<RepoInner>,
}

impl StopGuardRepo {
    /// Install a guard. Fails when stop is already in progress.
    pub(crate) fn setup(&self, guard: Arc<dyn StopGuard>) -> Result<(), StopGuardSetupError> {
        let mut inner = self.inner.lock();
        if inner.stop_requested {
            return Err(StopGuardSetupError);
        }
        inner.guards.push(guard);
        Ok(())
    }

    /// Remove a guard (by identity). Returns true when this removal
    /// makes a requested stop actionable.
    pub(crate) fn remove(&self, guard: &Arc<dyn StopGuard>) -> bool {
        let mut inner = self.inner.lock();
        inner.guards.retain(|g| !Arc::ptr_eq(g, guard));
        inner.stop_requested && inner.guards.is_empty()
    }

    /// Note a stop request. Returns the guards to notify and whether
    /// the stop may proceed immediately (no guards installed).
    pub(crate) fn request_stop(&self) -> (Vec<Arc<dyn StopGuard>>, bool) {
        let mut inner = self.inner.lock();
        inner.stop_requested = true;
        (inner.guards.clone(), inner.guards.is_empty())
    }
}

/// Marker error: a stop guard cannot be installed once stop is in
/// progress.
#[derive(Debug)]
pub(crate) struct StopGuardSetupError;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct NoopGuard;
    impl StopGuard for NoopGuard {
        fn stop(&self) {}
    }

    #[test]
    fn test_stop_proceeds_without_guards() {
        let repo = StopGuardRepo::default();
        let (to_notify, can_proceed) = repo.request_stop();
        assert!(to_notify.is_empty());
        assert!(can_proceed);
    }

    #[test]
    fn test_guard_defers_stop_until_removed() {
        let repo = StopGuardRepo::default();
        let guard: Arc<dyn StopGuard> = Arc::new(NoopGuard);
        repo.setup(Arc::clone(&guard)).unwrap();

        let (to_notify, can_proceed) = repo.request_stop();
        assert_eq!(to_notify.len(), 1);
        assert!(!can_proceed);

        assert!(repo.remove(&guard));
    }

    #[test]
    fn test_setup_fails_after_stop_requested() {
        let repo = StopGuardRepo::default();
        let _ = repo.request_stop();
        let guard: Arc<dyn StopGuard> = Arc::new(NoopGuard);
        assert!(repo.setup(guard).is_err());
    }

    #[test]
    fn test_removing_one_of_two_guards_does_not_release_stop() {
        let repo = StopGuardRepo::default();
        let a: Arc<dyn StopGuard> = Arc::new(NoopGuard);
        let b: Arc<dyn StopGuard> = Arc::new(NoopGuard);
        repo.setup(Arc::clone(&a)).unwrap();
        repo.setup(Arc::clone(&b)).unwrap();
        let _ = repo.request_stop();

        assert!(!repo.remove(&a));
        assert!(repo.remove(&b));
    }
}
