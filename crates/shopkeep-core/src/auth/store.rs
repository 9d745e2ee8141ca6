use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::routes::LoginRedirect;
use crate::storage::{KeyValueStore, StoredFields};

use super::refresh::RefreshCoordinator;
use super::CredentialBundle;

/// Capacity of the session event channel.
/// Subscribers that lag further behind than this only miss old events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle notifications for views that display session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut { redirect: LoginRedirect },
}

/// Hook the store fires when a valid token is read inside the renewal
/// window. Implementations must not block.
pub trait ProactiveRefresh: Send + Sync {
    fn trigger(&self);

    /// False once the hook's owner is gone; dead hooks are dropped.
    fn is_live(&self) -> bool {
        true
    }
}

/// Everything needed to run one refresh exchange, read in one snapshot.
#[derive(Debug, Clone)]
pub struct RefreshContext {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub remember_me: bool,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

#[derive(Default)]
struct SessionState {
    bundle: Option<CredentialBundle>,
    /// Bumped by every save and clear; writers that started from an older
    /// generation are stale.
    generation: u64,
}

/// Single source of truth for "am I logged in, with what, until when".
///
/// Readers go through the in-memory copy; every write replaces the whole
/// bundle under one lock. Backend I/O happens after the state lock is
/// released, serialized by a separate lock so the backend sees writes in
/// generation order while readers never wait on it.
pub struct SessionStore {
    backend: Box<dyn KeyValueStore>,
    state: RwLock<SessionState>,
    io: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    refresh_hooks: RwLock<Vec<Arc<dyn ProactiveRefresh>>>,
    refresh: RefreshCoordinator,
}

/// Backend write decided under the state lock, applied after it.
enum Persist {
    Store(StoredFields),
    Clear,
}

impl SessionStore {
    /// Create an empty store over `backend` without reading it.
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            state: RwLock::new(SessionState::default()),
            io: Mutex::new(()),
            events,
            refresh_hooks: RwLock::new(Vec::new()),
            refresh: RefreshCoordinator::default(),
        }
    }

    /// Create a store and restore any session persisted by a previous run.
    pub fn open(backend: Box<dyn KeyValueStore>) -> Self {
        let store = Self::new(backend);
        let restored = store.load();
        debug!(restored, "Session store opened");
        store
    }

    /// Load the session from the backend.
    ///
    /// Returns true if a complete bundle was found. Incomplete or unreadable
    /// data is discarded so no partial session is ever visible.
    pub fn load(&self) -> bool {
        let _io = self.lock_io();
        let fields = match self.backend.load() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session, discarding it");
                StoredFields::new()
            }
        };

        let bundle = CredentialBundle::from_fields(&fields);
        if bundle.is_none() && !fields.is_empty() {
            warn!("Stored session is incomplete, discarding it");
            self.apply(Persist::Clear);
        }

        let mut state = self.write_state();
        let found = bundle.is_some();
        state.bundle = bundle;
        state.generation += 1;
        found
    }

    /// Replace the session with `bundle`. Returns the new generation.
    pub fn save(&self, bundle: CredentialBundle) -> u64 {
        let _io = self.lock_io();
        let fields = bundle.to_fields();
        let generation = {
            let mut state = self.write_state();
            state.bundle = Some(bundle);
            state.generation += 1;
            state.generation
        };
        self.apply(Persist::Store(fields));
        generation
    }

    /// Replace the session only if nothing has written it since
    /// `generation` was observed. Returns the new generation on success.
    pub fn save_if_current(&self, bundle: CredentialBundle, generation: u64) -> Option<u64> {
        let _io = self.lock_io();
        let fields = bundle.to_fields();
        let next = {
            let mut state = self.write_state();
            if state.generation != generation {
                debug!(expected = generation, actual = state.generation, "Discarding stale session write");
                return None;
            }
            state.bundle = Some(bundle);
            state.generation += 1;
            state.generation
        };
        self.apply(Persist::Store(fields));
        Some(next)
    }

    /// Remove the session. Clearing an empty store is a no-op apart from
    /// advancing the generation.
    pub fn clear(&self) {
        let _io = self.lock_io();
        {
            let mut state = self.write_state();
            state.bundle = None;
            state.generation += 1;
        }
        self.apply(Persist::Clear);
    }

    /// Clear only if nothing has written the session since `generation`.
    ///
    /// Returns true if a session was actually ended by this call.
    pub fn clear_if_current(&self, generation: u64) -> bool {
        let _io = self.lock_io();
        let ended = {
            let mut state = self.write_state();
            if state.generation != generation {
                return false;
            }
            state.generation += 1;
            state.bundle.take().is_some()
        };
        self.apply(Persist::Clear);
        ended
    }

    /// Check if a token exists and has not yet expired.
    ///
    /// A valid token inside the renewal window triggers a background refresh.
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        let (valid, near_expiry) = match self.read_state().bundle {
            Some(ref b) => (!b.is_expired_at(now), b.needs_refresh_at(now)),
            None => (false, false),
        };

        if valid && near_expiry {
            self.request_proactive_refresh();
        }
        valid
    }

    /// The cached bundle, for display. No side effects.
    pub fn current(&self) -> Option<CredentialBundle> {
        self.read_state().bundle.clone()
    }

    /// Get the bearer token if a session exists
    pub fn access_token(&self) -> Option<String> {
        self.read_state().bundle.as_ref().map(|b| b.access_token.clone())
    }

    /// The bearer token together with the generation it belongs to.
    pub fn token_snapshot(&self) -> (Option<String>, u64) {
        let state = self.read_state();
        (state.bundle.as_ref().map(|b| b.access_token.clone()), state.generation)
    }

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    pub fn refresh_context(&self) -> Option<RefreshContext> {
        let state = self.read_state();
        state.bundle.as_ref().map(|b| RefreshContext {
            access_token: b.access_token.clone(),
            refresh_token: b.refresh_token.clone(),
            remember_me: b.remember_me,
            refresh_expires_at: b.refresh_expires_at,
            generation: state.generation,
        })
    }

    /// Register a proactive refresh hook. The first live hook is used;
    /// hooks whose owner has gone away are pruned.
    pub fn add_refresh_hook(&self, hook: Arc<dyn ProactiveRefresh>) {
        self.refresh_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    fn request_proactive_refresh(&self) {
        let hook = {
            let mut hooks = self
                .refresh_hooks
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            hooks.retain(|hook| hook.is_live());
            hooks.first().cloned()
        };
        match hook {
            Some(hook) => {
                debug!("Token near expiry, requesting proactive refresh");
                hook.trigger();
            }
            None => debug!("Token near expiry but no refresh hook registered"),
        }
    }

    fn apply(&self, persist: Persist) {
        let result = match persist {
            Persist::Store(ref fields) => self.backend.store(fields),
            Persist::Clear => self.backend.clear(),
        };
        if let Err(e) = result {
            match persist {
                Persist::Store(_) => warn!(error = %e, "Failed to persist session"),
                Persist::Clear => warn!(error = %e, "Failed to clear stored session"),
            }
        }
    }

    fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
