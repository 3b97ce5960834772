use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{SessionStorage, StorageEvent, StorageScope};

const EVENT_CAPACITY: usize = 64;

/// The durable session scope, kept in Redis.
///
/// Every instance pointed at the same Redis server and namespace shares one
/// session. Mutations are published on `{namespace}:storage` so that an
/// instance notices when another one clears the token.
pub struct RedisStorage {
    redis: ConnectionManager,
    namespace: String,
    origin: Uuid,
    events: broadcast::Sender<StorageEvent>,
    listener: CancellationToken,
}

impl RedisStorage {
    /// Connects to Redis and starts listening for mutations made elsewhere.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - The URL of the Redis server.
    /// * `namespace` - The prefix applied to every key.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `RedisStorage`.
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client.clone()).await?;
        tracing::info!("✅ Redis Connection Manager initialized");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let listener = CancellationToken::new();
        let channel = channel_name(namespace);

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        tracing::info!("📡 Listening for session changes on {}", channel);

        let forward = events.clone();
        let cancel = listener.clone();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = messages.next() => {
                        let Some(message) = message else {
                            tracing::warn!("⚠️ Redis pub/sub stream ended");
                            break;
                        };
                        let payload: String = match message.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!("❌ Unreadable storage notification: {}", e);
                                continue;
                            }
                        };
                        match sonic_rs::from_str::<StorageEvent>(&payload) {
                            Ok(event) => {
                                let _ = forward.send(event);
                            }
                            Err(e) => tracing::warn!("❌ Invalid storage notification: {}", e),
                        }
                    }
                }
            }
        });

        Ok(Self {
            redis,
            namespace: namespace.to_string(),
            origin: Uuid::new_v4(),
            events,
            listener,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn publish(&self, event: &StorageEvent) -> Result<()> {
        let payload = sonic_rs::to_string(event)?;
        let mut redis = self.redis.clone();
        let _: i64 = redis.publish(channel_name(&self.namespace), payload).await?;
        Ok(())
    }
}

impl Drop for RedisStorage {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}

fn channel_name(namespace: &str) -> String {
    format!("{}:storage", namespace)
}

#[async_trait]
impl SessionStorage for RedisStorage {
    fn scope(&self) -> StorageScope {
        StorageScope::Durable
    }

    fn origin(&self) -> Uuid {
        self.origin
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut redis = self.redis.clone();
        let value: Option<String> = redis.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis.set(self.key(key), value).await?;
        self.publish(&StorageEvent {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            origin: self.origin,
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis.del(self.key(key)).await?;
        if removed > 0 {
            tracing::debug!("🗑️ Removed {} from durable storage", key);
            self.publish(&StorageEvent {
                key: key.to_string(),
                new_value: None,
                origin: self.origin,
            })
            .await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_round_trip_through_json() {
        let event = StorageEvent {
            key: "token".to_string(),
            new_value: None,
            origin: Uuid::new_v4(),
        };
        let payload = sonic_rs::to_string(&event).unwrap();
        assert_eq!(sonic_rs::from_str::<StorageEvent>(&payload).unwrap(), event);
        assert_eq!(channel_name("gridwatch"), "gridwatch:storage");
    }
}
