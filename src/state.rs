use std::sync::Arc;

use crate::config::Config;
use crate::db::RedisStorage;
use crate::error::Result;
use crate::middleware_layer::auth::AuthInterceptor;
use crate::repositories::identity::HttpIdentityBackend;
use crate::repositories::resource::ResourceClient;
use crate::services::auth::SessionManager;
use crate::services::dashboard::Dashboard;
use crate::services::permissions::{HttpPermissionBackend, PermissionCache};
use crate::services::realtime::{RealtimeService, TransportDefault};
use crate::storage::{MemoryStorage, SessionStorage, StorageScope};

/// The application's state: one session context and the services that
/// read it, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The session owner.
    pub session: SessionManager,
    /// The interceptor every REST call goes through.
    pub http: AuthInterceptor,
    /// The permission set of the current session.
    pub permissions: PermissionCache,
    /// The entity collections.
    pub resources: ResourceClient,
    /// The realtime stream client.
    pub realtime: Arc<RealtimeService>,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let durable: Arc<dyn SessionStorage> = match &config.redis_url {
            Some(url) => Arc::new(RedisStorage::connect(url, &config.storage_namespace).await?),
            None => {
                tracing::info!("✅ Durable session storage kept in memory");
                Arc::new(MemoryStorage::new(StorageScope::Durable))
            }
        };
        Self::with_storage(config, durable, Arc::new(MemoryStorage::new(StorageScope::Tab)))
    }

    /// Creates a new `AppState` over the given storage scopes.
    pub fn with_storage(
        config: &Config,
        durable: Arc<dyn SessionStorage>,
        tab: Arc<dyn SessionStorage>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        // The stream response never completes, so no total timeout here.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        tracing::info!("✅ HTTP clients initialized");

        let identity = Arc::new(HttpIdentityBackend::new(client.clone(), config));
        let session = SessionManager::new(identity, durable, tab, config.expiry_margin);

        let http = AuthInterceptor::new(client, session.clone(), &config.logout_path);

        let permissions = PermissionCache::new(
            Arc::new(HttpPermissionBackend::new(http.clone(), config)),
            session.clone(),
        );
        permissions.spawn_sync(session.subscribe());
        tracing::info!("✅ Permission cache following the session");

        let resources = ResourceClient::new(http.clone(), config);

        let policy = Arc::new(TransportDefault {
            delay: config.stream_retry,
        });
        let realtime = Arc::new(RealtimeService::new(stream_client, config, policy));
        tracing::info!("✅ Realtime service ready");

        Ok(AppState {
            config: config.clone(),
            session,
            http,
            permissions,
            resources,
            realtime,
        })
    }

    /// A dashboard over this state's services.
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::new(self.resources.clone(), Arc::clone(&self.realtime))
    }
}
