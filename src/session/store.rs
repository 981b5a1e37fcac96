/// Single source of truth for identity and tokens, durable across
/// process restarts.
use anyhow::Result;
use std::sync::Mutex;
use tokio::sync::watch;

use super::persist::{PersistedSnapshot, SnapshotStore};
use crate::types::{SessionState, UserPatch, UserProfile};

/// Identity/token state with write-through persistence.
///
/// Mutations (`login`, `logout`, `update_user`) are serialized through one
/// internal lock and persist the new snapshot before returning, so an
/// immediate process restart initiated by the caller cannot race ahead of
/// the write. State changes are published on a watch channel; consumers
/// subscribe instead of polling.
pub struct SessionStore {
    state: Mutex<SessionState>,
    snapshots: Box<dyn SnapshotStore>,
    notify: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new(snapshots: Box<dyn SnapshotStore>) -> Self {
        let (notify, _) = watch::channel(SessionState::empty());
        Self {
            state: Mutex::new(SessionState::empty()),
            snapshots,
            notify,
        }
    }

    /// Load the persisted snapshot (or start empty if there is none) and
    /// mark the store hydrated. Until this has run, `is_authenticated()`
    /// reads false even if a valid snapshot exists on disk.
    pub fn hydrate(&self) {
        let loaded = self.snapshots.load();

        let mut state = self.state.lock().unwrap();
        *state = loaded.map(|s| s.state).unwrap_or_else(SessionState::empty);
        state.hydrated = true;

        tracing::debug!(
            authenticated = state.is_authenticated,
            "Session store hydrated"
        );
        self.notify.send_replace(state.clone());
    }

    /// Set all identity fields as one unit and persist before returning.
    /// Post-condition: the next `hydrate()` (in this or a fresh process)
    /// observes exactly this state.
    pub fn login(&self, user: UserProfile, token: String, github_token: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let mut next = SessionState {
            user: Some(user),
            token: Some(token),
            github_token: Some(github_token),
            is_authenticated: false,
            hydrated: state.hydrated,
        };
        next.enforce_invariant();

        self.snapshots.save(&PersistedSnapshot::new(next.clone()))?;

        *state = next;
        self.notify.send_replace(state.clone());
        Ok(())
    }

    /// Reset all identity fields and persist the cleared snapshot
    pub fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let mut next = SessionState::empty();
        next.hydrated = state.hydrated;

        self.snapshots.save(&PersistedSnapshot::new(next.clone()))?;

        *state = next;
        self.notify.send_replace(state.clone());
        Ok(())
    }

    /// Merge `patch` into the current profile, leaving tokens and the
    /// authenticated flag untouched. No-op when no user is set.
    pub fn update_user(&self, patch: UserPatch) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let Some(user) = state.user.as_mut() else {
            return Ok(());
        };
        patch.apply(user);

        self.snapshots.save(&PersistedSnapshot::new(state.clone()))?;

        self.notify.send_replace(state.clone());
        Ok(())
    }

    /// Current state (a point-in-time copy)
    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    /// False until hydration has completed, regardless of what is on disk
    pub fn is_authenticated(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.hydrated && state.is_authenticated
    }

    pub fn is_hydrated(&self) -> bool {
        self.state.lock().unwrap().hydrated
    }

    /// Subscribe to state-change notifications
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.notify.subscribe()
    }

    /// Delete the persisted snapshot without touching in-memory state.
    /// Part of the manual recovery surface.
    pub fn clear_snapshot(&self) -> Result<()> {
        self.snapshots.clear()
    }
}
