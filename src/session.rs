use crate::{
    domain::AuthBackend,
    errors::AuthError,
    models::{Session, User},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

// Bounds how long a sign-in/out waits for its auth event to reach the context.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<User>,
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
        }
    }
}

/// Read-only view of the current session, handed to every store that needs it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    receiver: watch::Receiver<SessionState>,
}

impl SessionContext {
    pub fn current_user(&self) -> Option<User> {
        self.receiver.borrow().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.receiver.borrow().loading
    }

    pub fn snapshot(&self) -> SessionState {
        self.receiver.borrow().clone()
    }
}

/// Tracks who is signed in.
///
/// Lifecycle: `new` (loading, no user) → `init` (reads the backend's current session once and
/// subscribes to its auth events) → `teardown` (ends the subscription). Every change to the
/// signed-in user, including the effect of `sign_out`, arrives through that subscription.
pub struct SessionStore {
    auth: Arc<dyn AuthBackend>,
    state: Arc<watch::Sender<SessionState>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthBackend>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            auth,
            state: Arc::new(state),
            listener: Mutex::new(None),
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            receiver: self.state.subscribe(),
        }
    }

    pub async fn init(&self) {
        // Subscribe before reading so no event slips between the read and the subscription.
        let mut subscription = self.auth.on_auth_state_change();

        let initial = match self.auth.get_session().await {
            Ok(session) => session.map(|s| s.user),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read initial session");
                None
            }
        };
        tracing::info!(signed_in = initial.is_some(), "Session store initialized");
        self.state.send_replace(SessionState {
            user: initial,
            loading: false,
        });

        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                tracing::debug!(kind = ?event.kind, "Auth state changed");
                state.send_replace(SessionState {
                    user: event.session.map(|s| s.user),
                    loading: false,
                });
            }
            tracing::debug!("Auth event stream closed");
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Ends the auth-event subscription. The last known state stays readable.
    pub fn teardown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            tracing::info!("Session store torn down");
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>, AuthError> {
        tracing::info!(%email, %username, "Starting sign-up");
        match self.auth.sign_up(email, password, username).await {
            Ok(session) => {
                if let Some(session) = &session {
                    self.settle(Some(session.user.id)).await;
                }
                tracing::info!(%email, confirmed = session.is_some(), "Sign-up succeeded");
                Ok(session)
            }
            Err(e) => {
                tracing::error!(%email, error = %e, "Sign-up failed");
                Err(e.into())
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        tracing::info!(%email, "Starting sign-in");
        match self.auth.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.settle(Some(session.user.id)).await;
                tracing::info!(%email, user_id = %session.user.id, "Sign-in succeeded");
                Ok(session)
            }
            Err(e) => {
                tracing::error!(%email, error = %e, "Sign-in failed");
                Err(e.into())
            }
        }
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.auth.sign_out().await.map_err(|e| {
            tracing::error!(error = %e, "Sign-out failed");
            AuthError::from(e)
        })?;
        self.settle(None).await;
        Ok(())
    }

    // Waits until the auth event for a completed sign-in/out has reached the context.
    async fn settle(&self, expected: Option<Uuid>) {
        if self.listener.lock().is_none() {
            return;
        }
        let mut receiver = self.state.subscribe();
        let settled = tokio::time::timeout(
            SETTLE_TIMEOUT,
            receiver.wait_for(|s| s.user.as_ref().map(|u| u.id) == expected),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        if !settled {
            tracing::warn!(?expected, "Auth event not observed before timeout");
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UNREACHABLE_MESSAGE;
    use crate::memory::MemoryBackend;

    #[tokio::test]
    async fn starts_loading_then_reflects_backend_session() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        let ctx = store.context();
        assert!(ctx.is_loading());

        store.init().await;
        assert!(!ctx.is_loading());
        assert_eq!(ctx.current_user(), None);

        let session = store.sign_up("ann@example.com", "hunter22", "ann").await.unwrap().unwrap();
        assert_eq!(ctx.current_user().map(|u| u.id), Some(session.user.id));

        store.sign_out().await.unwrap();
        assert_eq!(ctx.current_user(), None);
    }

    #[tokio::test]
    async fn transport_failures_are_distinguished_from_rejections() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        store.init().await;

        let rejected = store.sign_in("nobody@example.com", "whatever").await.unwrap_err();
        assert!(matches!(rejected, AuthError::Rejected { .. }));

        backend.set_offline(true);
        let unreachable = store.sign_in("nobody@example.com", "whatever").await.unwrap_err();
        assert_eq!(unreachable, AuthError::Unreachable);
        assert_eq!(unreachable.to_string(), UNREACHABLE_MESSAGE);
    }

    #[tokio::test]
    async fn teardown_stops_following_auth_events() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        let ctx = store.context();
        store.init().await;
        store.teardown();

        backend.sign_up("ann@example.com", "hunter22", "ann").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(ctx.current_user(), None);
    }

    #[tokio::test]
    async fn picks_up_a_session_that_already_exists() {
        let backend = Arc::new(MemoryBackend::new());
        let session = backend.sign_up("ann@example.com", "hunter22", "ann").await.unwrap().unwrap();

        let store = SessionStore::new(backend);
        store.init().await;
        assert_eq!(store.context().current_user(), Some(session.user));
    }
}
