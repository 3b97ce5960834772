use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use http::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::hierarchy::decode_list;
use crate::models::telemetry::SensorUpdateEvent;
use crate::sse::SseDecoder;

/// The lifecycle of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Error,
}

/// Receives what happens on the push connection.
///
/// Callbacks run on the connection task, one at a time, in arrival order.
pub trait RealtimeObserver: Send + Sync {
    fn on_connect(&self) {}

    /// Called when the connection is closed with [`RealtimeService::disconnect`].
    fn on_disconnect(&self) {}

    /// Called on transport failures and on messages that do not parse.
    fn on_error(&self, _error: &AppError) {}

    fn on_sensor_update(&self, _event: SensorUpdateEvent) {}
}

/// Decides whether, and when, a dropped connection is retried.
pub trait ReconnectPolicy: Send + Sync {
    /// # Arguments
    ///
    /// * `attempt` - 1 for the first retry after a connection was lost.
    /// * `server_hint` - The delay last sent by the server in a `retry:` field.
    ///
    /// # Returns
    ///
    /// The delay before the next attempt, or `None` to give up.
    fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Option<Duration>;
}

/// Retries forever after the server's hint, or a fixed delay without one.
/// This is how a browser's event source behaves.
#[derive(Debug, Clone)]
pub struct TransportDefault {
    pub delay: Duration,
}

impl Default for TransportDefault {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectPolicy for TransportDefault {
    fn next_delay(&self, _attempt: u32, server_hint: Option<Duration>) -> Option<Duration> {
        Some(server_hint.unwrap_or(self.delay))
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&self, _attempt: u32, _server_hint: Option<Duration>) -> Option<Duration> {
        None
    }
}

/// Doubles the delay on every attempt up to a cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, _server_hint: Option<Duration>) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

struct ActiveStream {
    id: Uuid,
    cancel: CancellationToken,
    observer: Arc<dyn RealtimeObserver>,
}

/// The client side of the realtime sensor stream.
///
/// At most one connection is open at a time. The connection task is the
/// only writer of the [`ConnectionState`] besides [`RealtimeService::disconnect`].
pub struct RealtimeService {
    client: reqwest::Client,
    stream_url: String,
    latest_url: String,
    request_timeout: Duration,
    policy: Arc<dyn ReconnectPolicy>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Mutex<Option<ActiveStream>>,
}

impl RealtimeService {
    /// Creates a new `RealtimeService`.
    ///
    /// The client must not carry a total request timeout, as the stream
    /// response never finishes.
    pub fn new(client: reqwest::Client, config: &Config, policy: Arc<dyn ReconnectPolicy>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            stream_url: config.url(&config.stream_path),
            latest_url: config.url(&config.latest_path),
            request_timeout: config.request_timeout,
            policy,
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    /// Opens the stream, closing any connection already open.
    ///
    /// The token travels as a query parameter: event-stream transports cannot
    /// set an Authorization header.
    pub fn connect(&self, token: &str, observer: Arc<dyn RealtimeObserver>) {
        self.disconnect();

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let connection = Connection {
            id,
            client: self.client.clone(),
            url: self.stream_url.clone(),
            token: token.to_string(),
            policy: Arc::clone(&self.policy),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            observer: Arc::clone(&observer),
        };

        connection.set_state(ConnectionState::Connecting);
        tokio::spawn(connection.run());

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveStream {
            id,
            cancel,
            observer,
        });
    }

    /// Closes the stream. Safe to call when nothing is open.
    pub fn disconnect(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(active) = active else {
            return;
        };

        active.cancel.cancel();
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("🔌 Disconnected from realtime stream [{}]", active.id);
        active.observer.on_disconnect();
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Pulls the latest reading of every sensor in one request, for when the
    /// stream cannot be established.
    ///
    /// # Returns
    ///
    /// A `Result` containing the events. Errors are returned to the caller.
    pub async fn fetch_latest_snapshot(&self, token: &str) -> Result<Vec<SensorUpdateEvent>> {
        let response = self
            .client
            .get(&self.latest_url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                message: "latest readings unavailable".to_string(),
            });
        }

        let body = response.bytes().await?;
        let events: Vec<SensorUpdateEvent> = decode_list(&body)?;
        tracing::debug!("📥 Pulled {} latest readings", events.len());
        Ok(events)
    }
}

impl Drop for RealtimeService {
    fn drop(&mut self) {
        if let Some(active) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            active.cancel.cancel();
        }
    }
}

enum StreamEnd {
    /// The server refused the stream; not retried.
    Rejected(AppError),
    /// The stream failed or ended after being accepted, or never connected.
    Dropped(AppError),
}

struct Connection {
    id: Uuid,
    client: reqwest::Client,
    url: String,
    token: String,
    policy: Arc<dyn ReconnectPolicy>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    observer: Arc<dyn RealtimeObserver>,
}

impl Connection {
    /// Writes the state unless this connection has been superseded.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if self.cancel.is_cancelled() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn fail(&self, error: AppError) {
        self.set_state(ConnectionState::Error);
        if !self.cancel.is_cancelled() {
            self.observer.on_error(&error);
        }
    }

    async fn run(self) {
        let mut attempt: u32 = 0;
        let mut last_event_id: Option<String> = None;
        let mut retry_hint: Option<Duration> = None;

        loop {
            self.set_state(ConnectionState::Connecting);
            let end = tokio::select! {
                _ = self.cancel.cancelled() => return,
                end = self.stream(&mut attempt, &mut last_event_id, &mut retry_hint) => end,
            };

            match end {
                StreamEnd::Rejected(error) => {
                    tracing::warn!("❌ Realtime stream rejected [{}]: {}", self.id, error);
                    self.fail(error);
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                StreamEnd::Dropped(error) => {
                    tracing::warn!("⚠️ Realtime stream lost [{}]: {}", self.id, error);
                    self.fail(error);
                }
            }

            attempt = attempt.saturating_add(1);
            let Some(delay) = self.policy.next_delay(attempt, retry_hint) else {
                tracing::warn!("❌ Giving up on realtime stream [{}] after {} attempts", self.id, attempt);
                self.set_state(ConnectionState::Disconnected);
                return;
            };

            tracing::debug!("🔁 Reconnecting [{}] in {:?} (attempt {})", self.id, delay, attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream(
        &self,
        attempt: &mut u32,
        last_event_id: &mut Option<String>,
        retry_hint: &mut Option<Duration>,
    ) -> StreamEnd {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("token", self.token.as_str())])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id.as_deref() {
            request = request.header("Last-Event-ID", id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return StreamEnd::Dropped(AppError::Stream(e.to_string())),
        };

        let status = response.status();
        if !status.is_success() {
            return StreamEnd::Rejected(AppError::Status {
                status: status.as_u16(),
                message: "stream refused".to_string(),
            });
        }

        *attempt = 0;
        self.set_state(ConnectionState::Open);
        tracing::info!("📡 Connected to realtime stream [{}]", self.id);
        if !self.cancel.is_cancelled() {
            self.observer.on_connect();
        }

        let mut decoder = SseDecoder::with_last_event_id(last_event_id.clone());
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return StreamEnd::Dropped(AppError::Stream(e.to_string())),
            };

            for event in decoder.feed(&chunk) {
                if self.cancel.is_cancelled() {
                    return StreamEnd::Dropped(AppError::Stream("cancelled".to_string()));
                }
                if !event.is_message() {
                    tracing::debug!("Ignoring {:?} event", event.event);
                    continue;
                }
                match sonic_rs::from_str::<SensorUpdateEvent>(&event.data) {
                    Ok(update) => self.observer.on_sensor_update(update),
                    Err(e) => self.observer.on_error(&AppError::MalformedEvent(e.to_string())),
                }
            }

            *last_event_id = decoder.last_event_id().map(str::to_string);
            if decoder.retry().is_some() {
                *retry_hint = decoder.retry();
            }
        }

        StreamEnd::Dropped(AppError::Stream("stream closed by server".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_default_prefers_the_server_hint() {
        let policy = TransportDefault::default();
        assert_eq!(policy.next_delay(1, None), Some(Duration::from_millis(3000)));
        assert_eq!(
            policy.next_delay(50, Some(Duration::from_millis(500))),
            Some(Duration::from_millis(500))
        );
        assert_eq!(NoReconnect.next_delay(1, None), None);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap_and_stops() {
        let policy = ExponentialBackoff {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
            max_attempts: Some(5),
        };
        assert_eq!(policy.next_delay(1, None), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(3, None), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(5, None), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(6, None), None);

        let unbounded = ExponentialBackoff { max_attempts: None, ..policy };
        assert_eq!(unbounded.next_delay(200, None), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn disconnect_without_a_stream_is_a_no_op() {
        let service = RealtimeService::new(
            reqwest::Client::new(),
            &Config::for_base_url("http://127.0.0.1:9"),
            Arc::new(NoReconnect),
        );
        service.disconnect();
        assert_eq!(service.state(), ConnectionState::Disconnected);
        assert!(!service.is_connected());
    }
}
