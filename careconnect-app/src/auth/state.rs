//! Authentication state types

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};

use crate::models::{Role, UserProfile};

/// Who is signed in
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthState {
    /// Nothing has looked at the persisted session yet
    #[default]
    Uninitialized,
    /// Reading the persisted session, possibly validating it
    Loading,
    /// No valid session
    Anonymous,
    Authenticated {
        user: UserProfile,
        token: Arc<str>,
    },
}

/// Shared view of the session, handed to everything that needs identity
///
/// Clones share the same state. Only the session store and the 401 listener
/// it installs move the state between variants.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    state: RwLock<AuthState>,
    watchers: Mutex<Vec<Sender<AuthState>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.read().clone()
    }

    pub fn identity(&self) -> Option<UserProfile> {
        match &*self.inner.state.read() {
            AuthState::Authenticated { user, .. } => Some(user.clone()),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<Arc<str>> {
        match &*self.inner.state.read() {
            AuthState::Authenticated { token, .. } => Some(token.clone()),
            _ => None,
        }
    }

    /// True until the startup rehydration has settled
    pub fn is_loading(&self) -> bool {
        matches!(
            *self.inner.state.read(),
            AuthState::Uninitialized | AuthState::Loading
        )
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.inner.state.read(), AuthState::Authenticated { .. })
    }

    pub fn has_role(&self, role: Role) -> bool {
        match &*self.inner.state.read() {
            AuthState::Authenticated { user, .. } => user.role == role,
            _ => false,
        }
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> Receiver<AuthState> {
        let (tx, rx) = unbounded();
        self.inner.watchers.lock().push(tx);
        rx
    }

    /// Move to `next`, notifying watchers if anything changed
    pub(crate) fn transition(&self, next: AuthState) {
        {
            let mut state = self.inner.state.write();
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        self.inner
            .watchers
            .lock()
            .retain(|tx| tx.send(next.clone()).is_ok());
    }
}
