mod common;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use tokio::sync::broadcast;

use gridwatch::config::Config;
use gridwatch::error::AppError;
use gridwatch::models::telemetry::{SensorUpdateEvent, SensorValue};
use gridwatch::services::realtime::{
    ConnectionState, NoReconnect, RealtimeObserver, RealtimeService, ReconnectPolicy,
    TransportDefault,
};
use gridwatch::services::telemetry::LiveFeed;

use common::eventually;

const TOKEN: &str = "stream-token";
const CLOSE: &str = "__close__";

/// A stub event-stream endpoint that relays whatever the test broadcasts.
#[derive(Clone)]
struct Hub {
    frames: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
}

impl Hub {
    fn new() -> Self {
        let (frames, _) = broadcast::channel(64);
        Self {
            frames,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn send(&self, data: &str) {
        self.frames.send(format!("data: {}\n\n", data)).unwrap();
    }

    fn send_raw(&self, frame: &str) {
        self.frames.send(frame.to_string()).unwrap();
    }

    /// Ends every open stream.
    fn close_all(&self) {
        self.frames.send(CLOSE.to_string()).unwrap();
    }
}

async fn stream(State(hub): State<Hub>, Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("token").map(String::as_str) != Some(TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    hub.connections.fetch_add(1, Ordering::SeqCst);

    let frames = hub.frames.subscribe();
    let relayed = futures::stream::unfold(frames, |mut frames| async move {
        loop {
            match frames.recv().await {
                Ok(frame) if frame == CLOSE => return None,
                Ok(frame) => return Some((frame, frames)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let body = futures::stream::once(async { ": connected\n\n".to_string() })
        .chain(relayed)
        .map(Ok::<_, Infallible>);

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn latest(headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer != Some("Bearer stream-token") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let body = serde_json::json!({
        "data": [
            update(1, 42.0, false),
            update(2, 3.5, true),
        ]
    });
    body.to_string().into_response()
}

fn update(sensor_id: i64, value: f64, is_alert: bool) -> serde_json::Value {
    serde_json::json!({
        "type": "sensor_update",
        "sensor_id": sensor_id,
        "sensor_name": format!("Sensor {}", sensor_id),
        "sensor_type": "temperature",
        "transformer_id": 7,
        "transformer_name": "T-7",
        "depot_name": "Depot A",
        "region_name": "North",
        "value": value,
        "is_alert": is_alert,
        "timestamp": 1_700_000_000_000.0
    })
}

/// Records every callback.
#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    errors: Mutex<Vec<String>>,
    updates: Mutex<Vec<SensorUpdateEvent>>,
}

impl Recorder {
    fn updates(&self) -> Vec<SensorUpdateEvent> {
        self.updates.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl RealtimeObserver for Recorder {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &AppError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn on_sensor_update(&self, event: SensorUpdateEvent) {
        self.updates.lock().unwrap().push(event);
    }
}

// Shared test context
struct TestContext {
    hub: Hub,
    service: RealtimeService,
}

impl TestContext {
    async fn new(policy: Arc<dyn ReconnectPolicy>) -> Self {
        let hub = Hub::new();
        let router = Router::new()
            .route("/realtime/stream/", get(stream))
            .route("/realtime/latest/", get(latest))
            .with_state(hub.clone());
        let base = common::serve(router).await;
        let service = RealtimeService::new(reqwest::Client::new(), &Config::for_base_url(&base), policy);
        Self { hub, service }
    }

    async fn connect_and_wait(&self, observer: Arc<dyn RealtimeObserver>) {
        let before = self.hub.connections();
        self.service.connect(TOKEN, observer);
        eventually("stream open", || {
            self.hub.connections() > before && self.service.is_connected()
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn later_readings_replace_earlier_ones() {
        let context = TestContext::new(Arc::new(NoReconnect)).await;
        let feed = Arc::new(LiveFeed::new());
        context.connect_and_wait(feed.clone()).await;
        assert!(feed.status().connected);

        context.hub.send(&update(1, 42.0, false).to_string());
        context.hub.send(&update(1, 58.0, true).to_string());

        eventually("second reading", || {
            feed.table()
                .get(1)
                .is_some_and(|e| e.value == SensorValue::Number(58.0))
        })
        .await;
        let table = feed.table();
        assert_eq!(table.len(), 1);
        let latest = table.latest(1).unwrap();
        assert_eq!(latest.value, Some(58.0));
        assert!(latest.is_alert);
    }

    #[tokio::test]
    async fn unreadable_messages_are_reported_and_skipped() {
        let context = TestContext::new(Arc::new(NoReconnect)).await;
        let recorder = Arc::new(Recorder::default());
        context.connect_and_wait(recorder.clone()).await;

        context.hub.send("{not json");
        context.hub.send(r#"{"type":"heartbeat"}"#);
        context.hub.send_raw(": keep-alive\n\n");
        context.hub.send_raw("event: ping\ndata: {}\n\n");
        context.hub.send(&update(3, 21.5, false).to_string());

        eventually("the valid update", || recorder.updates().len() == 1).await;
        assert_eq!(recorder.errors().len(), 2);
        assert_eq!(recorder.updates()[0].sensor_id, 3);
        assert_eq!(context.service.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn disconnect_stops_delivery_and_is_idempotent() {
        let context = TestContext::new(Arc::new(TransportDefault::default())).await;
        let recorder = Arc::new(Recorder::default());
        context.connect_and_wait(recorder.clone()).await;

        context.service.disconnect();
        context.service.disconnect();

        assert_eq!(context.service.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);

        context.hub.send(&update(1, 42.0, false).to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.updates().is_empty());
        assert!(recorder.errors().is_empty());
    }

    #[tokio::test]
    async fn a_refused_stream_is_not_retried() {
        let context = TestContext::new(Arc::new(TransportDefault {
            delay: Duration::from_millis(20),
        }))
        .await;
        let recorder = Arc::new(Recorder::default());
        let mut states = context.service.subscribe_state();

        context.service.connect("wrong-token", recorder.clone());

        common::within(
            "terminal state",
            states.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(recorder.errors().len(), 1);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
        assert_eq!(context.hub.connections(), 0);
        assert!(!context.service.is_connected());
    }

    #[tokio::test]
    async fn a_closed_stream_reconnects() {
        let context = TestContext::new(Arc::new(TransportDefault {
            delay: Duration::from_millis(50),
        }))
        .await;
        let feed = Arc::new(LiveFeed::new());
        context.connect_and_wait(feed.clone()).await;

        context.hub.close_all();
        eventually("reconnect", || context.hub.connections() == 2).await;
        eventually("open again", || context.service.is_connected()).await;

        context.hub.send(&update(9, 30.0, false).to_string());
        eventually("update after reconnect", || feed.table().contains(9)).await;
        assert!(feed.status().connected);
    }

    #[tokio::test]
    async fn a_closed_stream_stays_down_without_reconnect() {
        let context = TestContext::new(Arc::new(NoReconnect)).await;
        let feed = Arc::new(LiveFeed::new());
        context.connect_and_wait(feed.clone()).await;

        context.hub.close_all();
        eventually("feed marked down", || !feed.status().connected).await;
        assert!(feed.status().error.is_some());
        eventually("disconnected", || {
            context.service.state() == ConnectionState::Disconnected
        })
        .await;
        assert_eq!(context.hub.connections(), 1);
    }

    #[tokio::test]
    async fn connecting_again_replaces_the_open_stream() {
        let context = TestContext::new(Arc::new(NoReconnect)).await;
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        context.connect_and_wait(first.clone()).await;
        context.connect_and_wait(second.clone()).await;
        assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);

        context.hub.send(&update(4, 1.0, false).to_string());
        eventually("delivery to the new observer", || second.updates().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(first.updates().is_empty());
    }

    #[tokio::test]
    async fn latest_snapshot_is_pulled_with_a_bearer_token() {
        let context = TestContext::new(Arc::new(NoReconnect)).await;

        let events = context.service.fetch_latest_snapshot(TOKEN).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_alert);

        let refused = context.service.fetch_latest_snapshot("wrong-token").await;
        assert!(matches!(refused, Err(AppError::Status { status: 401, .. })));
    }
}
