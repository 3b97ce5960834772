use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use sonic_rs::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::middleware_layer::auth::AuthInterceptor;
use crate::models::hierarchy::list_field;
use crate::models::session::Session;
use crate::services::auth::SessionManager;

/// Where the permission list of the current session comes from.
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    async fn fetch_permissions(&self) -> Result<Vec<String>>;
}

/// Reads `permissions` out of the permissions document. A missing or
/// non-array value means no permissions.
fn parse_permissions(body: &[u8]) -> Result<Vec<String>> {
    let document: Value = sonic_rs::from_slice(body)?;
    list_field(&document, "permissions")
}

/// Reads `{ "permissions": [..] }` from the permissions endpoint.
pub struct HttpPermissionBackend {
    http: AuthInterceptor,
    url: String,
}

impl HttpPermissionBackend {
    pub fn new(http: AuthInterceptor, config: &Config) -> Self {
        Self {
            http,
            url: config.url(&config.permissions_path),
        }
    }
}

#[async_trait]
impl PermissionBackend for HttpPermissionBackend {
    async fn fetch_permissions(&self) -> Result<Vec<String>> {
        let response = self.http.send(self.http.client().get(&self.url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                message: "permissions unavailable".to_string(),
            });
        }
        let body = response.bytes().await?;
        parse_permissions(&body)
    }
}

/// The permission set of the current session.
///
/// Fails closed: anything short of a successful fetch for the current
/// session leaves the set empty.
#[derive(Clone)]
pub struct PermissionCache {
    backend: Arc<dyn PermissionBackend>,
    session: SessionManager,
    permissions: Arc<RwLock<HashSet<String>>>,
}

impl PermissionCache {
    pub fn new(backend: Arc<dyn PermissionBackend>, session: SessionManager) -> Self {
        Self {
            backend,
            session,
            permissions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(permission)
    }

    /// A sorted copy of the current set.
    pub fn permissions(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .permissions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        all.sort();
        all
    }

    /// Re-fetches the set for the current session.
    pub async fn refresh(&self) {
        let Some(token) = self.session.token() else {
            self.clear();
            return;
        };

        let fetched = self.backend.fetch_permissions().await;

        // The session may have changed while the request was in flight.
        if self.session.token().as_deref() != Some(token.as_str()) {
            tracing::debug!("Discarding permissions fetched for a previous session");
            return;
        }

        match fetched {
            Ok(list) => {
                tracing::info!("🔐 Loaded {} permissions", list.len());
                self.replace(list.into_iter().collect());
            }
            Err(e) => {
                tracing::warn!("❌ Permission fetch failed, denying everything: {}", e);
                self.clear();
            }
        }
    }

    pub fn clear(&self) {
        self.replace(HashSet::new());
    }

    fn replace(&self, set: HashSet<String>) {
        *self
            .permissions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = set;
    }

    /// Keeps the set in step with the session: refreshed for every new
    /// token, cleared when the session ends.
    pub fn spawn_sync(&self, mut sessions: watch::Receiver<Option<Session>>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut last_token: Option<String> = None;
            loop {
                let token = sessions.borrow_and_update().as_ref().map(|s| s.token.clone());
                if token != last_token {
                    match token {
                        Some(_) => cache.refresh().await,
                        None => cache.clear(),
                    }
                    last_token = token;
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
