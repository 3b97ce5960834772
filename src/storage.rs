use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::error::Result;

/// The key holding the bearer token.
pub const TOKEN_KEY: &str = "token";
/// The key holding the serialized user identity.
pub const USER_KEY: &str = "user";
/// The key holding the refresh token, when one was issued.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Every key a session writes.
pub const SESSION_KEYS: [&str; 3] = [TOKEN_KEY, USER_KEY, REFRESH_TOKEN_KEY];

const EVENT_CAPACITY: usize = 64;

/// Where a session is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageScope {
    /// Survives restarts and is shared with other instances.
    Durable,
    /// Lives as long as the current instance.
    Tab,
}

/// A mutation made to a storage scope, as seen by other observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub key: String,
    /// The new value; `None` when the key was removed.
    pub new_value: Option<String>,
    /// The storage handle that made the change.
    pub origin: Uuid,
}

/// A string key/value store backing one session scope.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// The scope this storage implements.
    fn scope(&self) -> StorageScope;

    /// Identifies this handle in the events it emits, so a subscriber can
    /// skip its own writes.
    fn origin(&self) -> Uuid;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Mutation notifications, for storages shared between instances.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }
}

/// An in-process storage scope.
///
/// Clones share the same map and the same notification channel but get a
/// fresh origin, so two `SessionManager`s built over clones of one
/// `MemoryStorage` see each other's writes the way two tabs share one
/// site's storage.
pub struct MemoryStorage {
    scope: StorageScope,
    origin: Uuid,
    entries: Arc<RwLock<HashMap<String, String>>>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new(scope: StorageScope) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scope,
            origin: Uuid::new_v4(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Whether the storage holds no keys at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin: self.origin,
        });
    }
}

impl Clone for MemoryStorage {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope,
            origin: Uuid::new_v4(),
            entries: Arc::clone(&self.entries),
            events: self.events.clone(),
        }
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    fn scope(&self) -> StorageScope {
        self.scope
    }

    fn origin(&self) -> Uuid {
        self.origin
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let existed = self.entries.write().await.remove(key).is_some();
        if existed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.events.subscribe())
    }
}
