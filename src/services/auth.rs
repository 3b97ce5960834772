use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::session::{Credentials, LoginGrant, Session};
use crate::models::user::UserIdentity;
use crate::repositories::identity::IdentityBackend;
use crate::storage::{
    REFRESH_TOKEN_KEY, SESSION_KEYS, SessionStorage, StorageScope, TOKEN_KEY, USER_KEY,
};
use crate::validation::auth::LoginForm;

/// Computes how long to wait before tearing down a session.
///
/// # Arguments
///
/// * `expires_at` - The expiry decoded from the token.
/// * `now` - The current time.
/// * `margin` - How long before expiry the session should end.
///
/// # Returns
///
/// `expires_at - now - margin`, or zero when that is already in the past.
pub fn expiry_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> Duration {
    (expires_at - now)
        .to_std()
        .ok()
        .and_then(|remaining| remaining.checked_sub(margin))
        .unwrap_or(Duration::ZERO)
}

struct Inner {
    backend: Arc<dyn IdentityBackend>,
    durable: Arc<dyn SessionStorage>,
    tab: Arc<dyn SessionStorage>,
    session: watch::Sender<Option<Session>>,
    expiry: Mutex<Option<CancellationToken>>,
    margin: Duration,
}

/// Owns the authenticated session.
///
/// This is the only writer of the session; everything else reads it through
/// [`SessionManager::subscribe`] or the accessors. Clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a new `SessionManager`.
    ///
    /// # Arguments
    ///
    /// * `backend` - The identity backend issuing tokens.
    /// * `durable` - The storage used when "remember me" is set.
    /// * `tab` - The storage used otherwise.
    /// * `margin` - How long before token expiry the session is dropped.
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        durable: Arc<dyn SessionStorage>,
        tab: Arc<dyn SessionStorage>,
        margin: Duration,
    ) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                backend,
                durable,
                tab,
                session,
                expiry: Mutex::new(None),
                margin,
            }),
        }
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    fn storage(&self, scope: StorageScope) -> &Arc<dyn SessionStorage> {
        match scope {
            StorageScope::Durable => &self.inner.durable,
            StorageScope::Tab => &self.inner.tab,
        }
    }

    /// Picks up a session persisted by an earlier run, durable scope first.
    ///
    /// # Returns
    ///
    /// A `Result` containing whether a session was restored.
    pub async fn restore(&self) -> Result<bool> {
        for scope in [StorageScope::Durable, StorageScope::Tab] {
            let storage = self.storage(scope);
            let Some(token) = storage.get(TOKEN_KEY).await? else {
                continue;
            };
            let user = match storage.get(USER_KEY).await? {
                Some(raw) => sonic_rs::from_str::<UserIdentity>(&raw).ok(),
                None => None,
            };
            let Some(user) = user else {
                tracing::warn!("⚠️ Stored token without a readable user in {:?} scope", scope);
                continue;
            };

            let session = Session::new(token, user);
            tracing::info!(
                "🔑 Restored session for {} from {:?} storage",
                session.user.username,
                scope
            );
            self.install(session);
            return Ok(true);
        }
        Ok(false)
    }

    /// Signs in.
    ///
    /// # Arguments
    ///
    /// * `username` - The username.
    /// * `password` - The password.
    /// * `remember` - Persist to durable storage instead of tab storage.
    ///
    /// # Returns
    ///
    /// Whether the login succeeded. On failure any prior session is kept.
    pub async fn login(&self, username: &str, password: &str, remember: bool) -> bool {
        if let Err(e) = LoginForm::new(username, password).check() {
            e.report();
            return false;
        }

        tracing::debug!("🔐 Logging in: {}", username);
        let grant = {
            let credentials = Credentials {
                username: username.to_string(),
                password: password.to_string(),
            };
            match self.inner.backend.authenticate(&credentials).await {
                Ok(grant) => grant,
                Err(e) => {
                    e.report();
                    return false;
                }
            }
        };

        let scope = if remember {
            StorageScope::Durable
        } else {
            StorageScope::Tab
        };
        if let Err(e) = self.persist(&grant, scope).await {
            e.report();
            return false;
        }

        let session = Session::new(grant.token, grant.user);
        tracing::info!(
            "✅ Logged in as {} ({:?} storage)",
            session.user.username,
            scope
        );
        self.install(session);
        true
    }

    async fn persist(&self, grant: &LoginGrant, scope: StorageScope) -> Result<()> {
        let user = sonic_rs::to_string(&grant.user)?;
        let target = self.storage(scope);
        target.set(TOKEN_KEY, &grant.token).await?;
        target.set(USER_KEY, &user).await?;
        match &grant.refresh_token {
            Some(refresh) => target.set(REFRESH_TOKEN_KEY, refresh).await?,
            None => target.remove(REFRESH_TOKEN_KEY).await?,
        }
        // Only logout clears both scopes.
        Ok(())
    }

    /// Signs out. Safe to call with no session.
    pub async fn logout(&self) {
        let mut previous = None;
        self.inner.session.send_if_modified(|current| {
            previous = current.take();
            previous.is_some()
        });
        self.cancel_expiry();

        for storage in [&self.inner.durable, &self.inner.tab] {
            for key in SESSION_KEYS {
                if let Err(e) = storage.remove(key).await {
                    tracing::warn!("⚠️ Failed to clear {} from {:?} storage: {}", key, storage.scope(), e);
                }
            }
        }

        if let Some(session) = previous {
            tracing::info!("👋 Logged out {}", session.user.username);
            if let Err(e) = self.inner.backend.revoke(&session.token).await {
                tracing::warn!("⚠️ Token revocation failed: {}", e);
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.session.borrow().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.inner.session.borrow().as_ref().map(|s| s.user.clone())
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.session.borrow().clone()
    }

    /// A receiver that observes every session change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.session.subscribe()
    }

    /// Watches the durable scope for another instance clearing the token.
    ///
    /// Returns `None` when the durable storage does not publish changes.
    pub fn spawn_storage_watch(&self) -> Option<JoinHandle<()>> {
        let mut events = self.inner.durable.subscribe()?;
        let own_origin = self.inner.durable.origin();
        let weak = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.key != TOKEN_KEY
                            || event.new_value.is_some()
                            || event.origin == own_origin
                        {
                            continue;
                        }
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let manager = SessionManager::from_inner(inner);
                        if manager.is_authenticated() {
                            tracing::info!("🔄 Token cleared by another instance, logging out");
                            manager.logout().await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("⚠️ Storage watch lagged by {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    fn install(&self, session: Session) {
        tracing::debug!("🔑 Session token {}…", session.token_hint());
        let token = session.token.clone();
        let expires_at = session.expires_at;
        self.inner.session.send_replace(Some(session));
        self.schedule_expiry(token, expires_at);
    }

    fn cancel_expiry(&self) {
        let previous = self
            .inner
            .expiry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = previous {
            timer.cancel();
        }
    }

    fn schedule_expiry(&self, token: String, expires_at: Option<DateTime<Utc>>) {
        self.cancel_expiry();
        let Some(expires_at) = expires_at else {
            tracing::debug!("No decodable expiry in token, session will not time out");
            return;
        };

        let delay = expiry_delay(expires_at, Utc::now(), self.inner.margin);
        tracing::debug!("⏰ Session expiry scheduled in {:?}", delay);

        let cancel = CancellationToken::new();
        *self
            .inner
            .expiry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let manager = SessionManager::from_inner(inner);
                    // A newer login may have replaced the token meanwhile.
                    if manager.token().as_deref() == Some(token.as_str()) {
                        tracing::info!("⏰ Session expired, logging out");
                        manager.logout().await;
                    }
                }
            }
        });
    }
}
