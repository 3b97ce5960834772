mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;

use gridwatch::config::Config;
use gridwatch::error::{AppError, Result};
use gridwatch::middleware_layer::auth::AuthInterceptor;
use gridwatch::services::auth::SessionManager;
use gridwatch::services::permissions::{HttpPermissionBackend, PermissionBackend, PermissionCache};
use gridwatch::storage::{MemoryStorage, StorageScope};

use common::{StubIdentity, eventually};

/// Hands out a fixed list, or fails when `fail` is set.
struct StubPermissions {
    granted: Vec<String>,
    fail: Mutex<bool>,
    calls: Mutex<usize>,
}

impl StubPermissions {
    fn new(granted: &[&str]) -> Self {
        Self {
            granted: granted.iter().map(|p| p.to_string()).collect(),
            fail: Mutex::new(false),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PermissionBackend for StubPermissions {
    async fn fetch_permissions(&self) -> Result<Vec<String>> {
        *self.calls.lock().unwrap() += 1;
        if *self.fail.lock().unwrap() {
            return Err(AppError::Status {
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(self.granted.clone())
    }
}

fn session_manager(token: &str) -> SessionManager {
    SessionManager::new(
        Arc::new(StubIdentity::new(token)),
        Arc::new(MemoryStorage::new(StorageScope::Durable)),
        Arc::new(MemoryStorage::new(StorageScope::Tab)),
        Duration::from_secs(5),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nothing_is_granted_without_a_session() {
        let backend = Arc::new(StubPermissions::new(&["api.view_region"]));
        let cache = PermissionCache::new(backend.clone(), session_manager("token-a"));

        cache.refresh().await;

        assert!(!cache.has_permission("api.view_region"));
        assert!(cache.permissions().is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn a_failed_fetch_denies_everything() {
        let backend = Arc::new(StubPermissions::new(&["api.view_region"]));
        let session = session_manager("token-a");
        let cache = PermissionCache::new(backend.clone(), session.clone());
        assert!(session.login("alice", "correct", true).await);

        cache.refresh().await;
        assert!(cache.has_permission("api.view_region"));

        *backend.fail.lock().unwrap() = true;
        cache.refresh().await;
        assert!(!cache.has_permission("api.view_region"));
    }

    #[tokio::test]
    async fn sync_follows_login_and_logout() {
        let backend = Arc::new(StubPermissions::new(&[
            "api.view_transformer",
            "api.add_region",
        ]));
        let session = session_manager("token-a");
        let cache = PermissionCache::new(backend.clone(), session.clone());
        let _sync = cache.spawn_sync(session.subscribe());

        assert!(session.login("alice", "correct", true).await);
        eventually("permissions after login", || {
            cache.has_permission("api.view_transformer")
        })
        .await;
        assert_eq!(
            cache.permissions(),
            vec!["api.add_region".to_string(), "api.view_transformer".to_string()]
        );
        assert!(!cache.has_permission("api.delete_region"));

        session.logout().await;
        eventually("permissions cleared after logout", || {
            cache.permissions().is_empty()
        })
        .await;
    }

    #[tokio::test]
    async fn http_backend_reads_the_permissions_document() {
        let router = Router::new().route(
            "/users/me/permissions/",
            get(|headers: HeaderMap| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer token-a") => (
                        StatusCode::OK,
                        r#"{"permissions":["api.view_region","auth.view_user"]}"#,
                    ),
                    _ => (StatusCode::FORBIDDEN, r#"{"detail":"forbidden"}"#),
                }
            }),
        );
        let base = common::serve(router).await;
        let config = Config::for_base_url(&base);

        let session = session_manager("token-a");
        let http = AuthInterceptor::new(reqwest::Client::new(), session.clone(), &config.logout_path);
        let cache = PermissionCache::new(
            Arc::new(HttpPermissionBackend::new(http, &config)),
            session.clone(),
        );

        assert!(session.login("alice", "correct", false).await);
        cache.refresh().await;

        assert!(cache.has_permission("auth.view_user"));
        assert!(cache.has_permission("api.view_region"));
        assert!(!cache.has_permission("api.add_region"));
    }
}
