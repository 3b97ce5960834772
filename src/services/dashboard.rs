use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::hierarchy::HierarchySnapshot;
use crate::repositories::resource::{Resource, ResourceClient};
use crate::services::hierarchy::{DashboardStats, DerivedHierarchyView, build_view};
use crate::services::realtime::{RealtimeObserver, RealtimeService};
use crate::services::telemetry::{FeedStatus, LiveFeed};

/// The live dashboard: a REST snapshot of the fleet with the realtime feed
/// overlaid on it.
///
/// Dropping the dashboard unmounts it, which always closes the stream.
pub struct Dashboard {
    resources: ResourceClient,
    realtime: Arc<RealtimeService>,
    feed: Arc<LiveFeed>,
    snapshot: RwLock<HierarchySnapshot>,
    error: RwLock<Option<String>>,
    mounted: AtomicBool,
}

impl Dashboard {
    pub fn new(resources: ResourceClient, realtime: Arc<RealtimeService>) -> Self {
        Self {
            resources,
            realtime,
            feed: Arc::new(LiveFeed::new()),
            snapshot: RwLock::new(HierarchySnapshot::default()),
            error: RwLock::new(None),
            mounted: AtomicBool::new(false),
        }
    }

    /// Loads the snapshot once, then opens the stream.
    pub async fn mount(&self, token: &str) {
        self.mounted.store(true, Ordering::SeqCst);
        self.refresh().await;
        let observer: Arc<dyn RealtimeObserver> = self.feed.clone();
        self.realtime.connect(token, observer);
        self.feed.reopen();
        tracing::info!("🖥️ Dashboard mounted");
    }

    /// Re-fetches the snapshot.
    ///
    /// # Returns
    ///
    /// Whether the fetch succeeded. On failure the previous snapshot stays
    /// in place and [`Dashboard::error`] describes what went wrong.
    pub async fn refresh(&self) -> bool {
        match self.resources.fetch_snapshot().await {
            Ok(snapshot) => {
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
                *self.error.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.feed.bump();
                true
            }
            Err(e) => {
                let message = e.report();
                *self.error.write().unwrap_or_else(PoisonError::into_inner) = Some(message);
                false
            }
        }
    }

    /// Creates an entity and reloads the snapshot.
    pub async fn create<R, B>(&self, body: &B) -> Result<R>
    where
        R: Resource,
        B: Serialize + ?Sized,
    {
        let created = self.resources.create::<R, B>(body).await?;
        self.refresh().await;
        Ok(created)
    }

    /// Updates an entity and reloads the snapshot.
    pub async fn update<R, B>(&self, id: i64, body: &B) -> Result<R>
    where
        R: Resource,
        B: Serialize + ?Sized,
    {
        let updated = self.resources.update::<R, B>(id, body).await?;
        self.refresh().await;
        Ok(updated)
    }

    /// Deletes an entity and reloads the snapshot.
    pub async fn delete<R: Resource>(&self, id: i64) -> Result<()> {
        self.resources.delete::<R>(id).await?;
        self.refresh().await;
        Ok(())
    }

    /// Fills the live table from the one-shot latest readings endpoint.
    ///
    /// # Returns
    ///
    /// A `Result` containing the number of readings folded in.
    pub async fn seed_from_latest(&self, token: &str) -> Result<usize> {
        let events = self.realtime.fetch_latest_snapshot(token).await?;
        let count = events.len();
        self.feed.seed(events);
        Ok(count)
    }

    /// The grouped view, rebuilt from the current snapshot and live table.
    pub fn view(&self) -> DerivedHierarchyView {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        build_view(&snapshot, &self.feed.table())
    }

    pub fn stats(&self) -> DashboardStats {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        DashboardStats::collect(&snapshot, &self.feed.table())
    }

    pub fn snapshot(&self) -> HierarchySnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The page-level error from the last failed refresh.
    pub fn error(&self) -> Option<String> {
        self.error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn feed(&self) -> &LiveFeed {
        &self.feed
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.feed.status()
    }

    /// Changes whenever the view would render differently.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.feed.changes()
    }

    /// Closes the stream and drops the live data. Safe to call repeatedly.
    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.realtime.disconnect();
            self.feed.close();
            tracing::info!("🖥️ Dashboard unmounted");
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.unmount();
    }
}
