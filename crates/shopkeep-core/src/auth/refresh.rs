//! Refresh bookkeeping shared by every gateway over one session store.
//!
//! The store owns exactly one `RefreshCoordinator`, so a refresh token is
//! exchanged at most once per session generation no matter how many
//! gateways are sending requests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshFailure {
    NoSession,
    NoRefreshToken,
    RefreshExpired,
    Rejected(String),
    Superseded,
}

impl RefreshFailure {
    /// Whether the session this failure belongs to can no longer be renewed.
    pub(crate) fn ends_session(&self) -> bool {
        matches!(
            self,
            RefreshFailure::NoRefreshToken | RefreshFailure::RefreshExpired | RefreshFailure::Rejected(_)
        )
    }
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshFailure::NoSession => write!(f, "no session"),
            RefreshFailure::NoRefreshToken => write!(f, "session has no refresh token"),
            RefreshFailure::RefreshExpired => write!(f, "refresh token expired"),
            RefreshFailure::Rejected(reason) => write!(f, "refresh rejected: {}", reason),
            RefreshFailure::Superseded => write!(f, "session changed during refresh"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RefreshError {
    pub reason: RefreshFailure,
    /// Session generation the failure applies to
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Renewed {
    pub token: String,
    pub generation: u64,
}

pub(crate) type RefreshOutcome = std::result::Result<Renewed, RefreshError>;

pub(crate) type RefreshFuture = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    inflight: Mutex<Option<InFlight>>,
    proactive_pending: AtomicBool,
}

impl RefreshCoordinator {
    /// The exchange running for `generation`, or a new one built by `start`.
    pub(crate) fn join_or_start<F>(&self, generation: u64, start: F) -> RefreshFuture
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(inflight) = slot.as_ref().filter(|f| f.generation == generation) {
            debug!("Joining in-flight token refresh");
            return inflight.future.clone();
        }
        let future = start().shared();
        *slot = Some(InFlight {
            generation,
            future: future.clone(),
        });
        future
    }

    /// Release the slot once the exchange for `generation` has completed.
    ///
    /// An exchange that ended the session stays in the slot, so later
    /// callers for the same generation get its failure instead of spending
    /// the refresh token again.
    pub(crate) fn finish(&self, generation: u64, outcome: &RefreshOutcome) {
        if matches!(outcome, Err(e) if e.reason.ends_session()) {
            return;
        }
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
    }

    /// Claim the single background refresh slot. False if one is running.
    pub(crate) fn begin_proactive(&self) -> bool {
        self.proactive_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_proactive(&self) {
        self.proactive_pending.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use futures::executor::block_on;

    use super::*;

    fn counting_start(calls: &Arc<AtomicUsize>, token: &'static str, generation: u64) -> BoxFuture<'static, RefreshOutcome> {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok(Renewed {
                token: token.to_string(),
                generation: generation + 1,
            })
        }
        .boxed()
    }

    #[test]
    fn test_same_generation_joins_one_exchange() {
        let coordinator = RefreshCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coordinator.join_or_start(3, || counting_start(&calls, "T2", 3));
        let second = coordinator.join_or_start(3, || counting_start(&calls, "T9", 3));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(block_on(first).unwrap().token, "T2");
        assert_eq!(block_on(second).unwrap().token, "T2");
    }

    #[test]
    fn test_new_generation_starts_new_exchange() {
        let coordinator = RefreshCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = coordinator.join_or_start(3, || counting_start(&calls, "T2", 3));
        let later = coordinator.join_or_start(5, || counting_start(&calls, "T3", 5));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(block_on(later).unwrap().generation, 6);
    }

    #[test]
    fn test_finish_only_clears_matching_generation() {
        let coordinator = RefreshCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coordinator.join_or_start(5, || counting_start(&calls, "T2", 5));
        let outcome = block_on(first);
        coordinator.finish(4, &outcome);
        let _ = coordinator.join_or_start(5, || counting_start(&calls, "T2", 5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        coordinator.finish(5, &outcome);
        let _ = coordinator.join_or_start(5, || counting_start(&calls, "T2", 5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejected_exchange_is_not_repeated() {
        let coordinator = RefreshCoordinator::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let rejected = |calls: &Arc<AtomicUsize>| -> BoxFuture<'static, RefreshOutcome> {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RefreshError {
                    reason: RefreshFailure::Rejected("Invalid refresh token".to_string()),
                    generation: 7,
                })
            }
            .boxed()
        };

        let outcome = block_on(coordinator.join_or_start(7, || rejected(&calls)));
        coordinator.finish(7, &outcome);

        let again = block_on(coordinator.join_or_start(7, || rejected(&calls)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(again, Err(e) if e.reason.ends_session()));

        // A later session gets a fresh exchange
        let _ = coordinator.join_or_start(8, || counting_start(&calls, "T2", 8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_one_proactive_refresh_at_a_time() {
        let coordinator = RefreshCoordinator::default();
        assert!(coordinator.begin_proactive());
        assert!(!coordinator.begin_proactive());
        coordinator.end_proactive();
        assert!(coordinator.begin_proactive());
    }

    #[test]
    fn test_failures_that_end_the_session() {
        assert!(RefreshFailure::Rejected("401".to_string()).ends_session());
        assert!(RefreshFailure::NoRefreshToken.ends_session());
        assert!(RefreshFailure::RefreshExpired.ends_session());
        assert!(!RefreshFailure::Superseded.ends_session());
        assert!(!RefreshFailure::NoSession.ends_session());
    }
}
