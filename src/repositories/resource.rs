use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::middleware_layer::auth::AuthInterceptor;
use crate::models::hierarchy::{
    Depot, District, HierarchySnapshot, Region, Sensor, Transformer, decode_list,
};
use crate::models::user::{ManagedUser, Role};

/// An entity type exposed as a REST collection.
pub trait Resource: DeserializeOwned + Send {
    /// The collection's path segment.
    const COLLECTION: &'static str;
}

impl Resource for Region {
    const COLLECTION: &'static str = "regions";
}

impl Resource for District {
    const COLLECTION: &'static str = "districts";
}

impl Resource for Depot {
    const COLLECTION: &'static str = "depots";
}

impl Resource for Transformer {
    const COLLECTION: &'static str = "transformers";
}

impl Resource for Sensor {
    const COLLECTION: &'static str = "sensors";
}

impl Resource for ManagedUser {
    const COLLECTION: &'static str = "users";
}

impl Resource for Role {
    const COLLECTION: &'static str = "roles";
}

/// CRUD access to the entity collections.
#[derive(Clone)]
pub struct ResourceClient {
    http: AuthInterceptor,
    base: String,
}

impl ResourceClient {
    pub fn new(http: AuthInterceptor, config: &Config) -> Self {
        Self {
            http,
            base: config.url(&config.resource_prefix),
        }
    }

    fn collection_url<R: Resource>(&self) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), R::COLLECTION)
    }

    fn item_url<R: Resource>(&self, id: i64) -> String {
        format!("{}/{}", self.collection_url::<R>(), id)
    }

    /// Lists a collection, whatever envelope the backend wraps it in.
    pub async fn list<R: Resource>(&self) -> Result<Vec<R>> {
        let request = self.http.client().get(self.collection_url::<R>());
        let body = self.execute(request).await?;
        decode_list(&body)
    }

    pub async fn get<R: Resource>(&self, id: i64) -> Result<R> {
        let request = self.http.client().get(self.item_url::<R>(id));
        let body = self.execute(request).await?;
        Ok(sonic_rs::from_slice(&body)?)
    }

    /// Creates an entity through `POST …/{collection}/create`.
    pub async fn create<R, B>(&self, body: &B) -> Result<R>
    where
        R: Resource,
        B: Serialize + ?Sized,
    {
        let url = format!("{}/create", self.collection_url::<R>());
        let request = self
            .http
            .client()
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(sonic_rs::to_string(body)?);
        let body = self.execute(request).await?;
        Ok(sonic_rs::from_slice(&body)?)
    }

    pub async fn update<R, B>(&self, id: i64, body: &B) -> Result<R>
    where
        R: Resource,
        B: Serialize + ?Sized,
    {
        let request = self
            .http
            .client()
            .put(self.item_url::<R>(id))
            .header(CONTENT_TYPE, "application/json")
            .body(sonic_rs::to_string(body)?);
        let body = self.execute(request).await?;
        Ok(sonic_rs::from_slice(&body)?)
    }

    pub async fn delete<R: Resource>(&self, id: i64) -> Result<()> {
        let request = self.http.client().delete(self.item_url::<R>(id));
        self.execute(request).await?;
        Ok(())
    }

    /// Fetches the five hierarchy collections concurrently.
    pub async fn fetch_snapshot(&self) -> Result<HierarchySnapshot> {
        let (regions, districts, depots, transformers, sensors) = futures::try_join!(
            self.list::<Region>(),
            self.list::<District>(),
            self.list::<Depot>(),
            self.list::<Transformer>(),
            self.list::<Sensor>(),
        )?;
        tracing::debug!(
            "📦 Snapshot: {} regions, {} districts, {} depots, {} transformers, {} sensors",
            regions.len(),
            districts.len(),
            depots.len(),
            transformers.len(),
            sensors.len()
        );
        Ok(HierarchySnapshot {
            regions,
            districts,
            depots,
            transformers,
            sensors,
        })
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let response = self.http.send(request).await?;
        let status = response.status();
        if status == http::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }
        Ok(body.to_vec())
    }
}
