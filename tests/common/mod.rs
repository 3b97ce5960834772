#![allow(dead_code)]

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use gridwatch::error::{AppError, Result};
use gridwatch::models::session::{Credentials, LoginGrant};
use gridwatch::models::user::UserIdentity;
use gridwatch::repositories::identity::IdentityBackend;

/// Serves a router on an ephemeral port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A JWT carrying the given claims, signed with a key the client never sees.
pub fn jwt(claims: &serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(b"backend-secret"),
    )
    .unwrap()
}

/// A JWT expiring `secs` seconds from now.
pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    jwt(&serde_json::json!({ "sub": "1", "exp": exp }))
}

pub fn alice() -> UserIdentity {
    UserIdentity {
        id: 1,
        username: "alice".to_string(),
        email: "alice@grid.example".to_string(),
        first_name: "Alice".to_string(),
        last_name: "Moyo".to_string(),
    }
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Awaits a future, failing the test after two seconds.
pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// An identity backend that accepts alice/correct and hands out a fixed token.
pub struct StubIdentity {
    pub token: Mutex<String>,
    pub revoked: Mutex<Vec<String>>,
    pub logins: Mutex<usize>,
}

impl StubIdentity {
    pub fn new(token: &str) -> Self {
        Self {
            token: Mutex::new(token.to_string()),
            revoked: Mutex::new(Vec::new()),
            logins: Mutex::new(0),
        }
    }

    pub fn issue(&self, token: &str) {
        *self.token.lock().unwrap() = token.to_string();
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn logins(&self) -> usize {
        *self.logins.lock().unwrap()
    }
}

#[async_trait]
impl IdentityBackend for StubIdentity {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginGrant> {
        *self.logins.lock().unwrap() += 1;
        if credentials.username == "alice" && credentials.password == "correct" {
            Ok(LoginGrant {
                token: self.token.lock().unwrap().clone(),
                refresh_token: Some("refresh-1".to_string()),
                user: alice(),
            })
        } else {
            Err(AppError::Authentication("bad credentials".to_string()))
        }
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }
}
