use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use sonic_rs::{JsonValueTrait, Value};
use tokio::sync::watch;

use crate::error::AppError;
use crate::models::hierarchy::Sensor;
use crate::models::telemetry::{
    LatestReading, SensorId, SensorKind, SensorUpdateEvent, SensorValue,
};
use crate::services::realtime::RealtimeObserver;

/// The latest known event per sensor.
///
/// Each upsert replaces the whole entry for its sensor. Arrival order wins:
/// the embedded timestamp is never compared.
#[derive(Debug, Clone, Default)]
pub struct LiveTable {
    entries: HashMap<SensorId, SensorUpdateEvent>,
}

impl LiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an event, returning the one it replaced.
    pub fn upsert(&mut self, event: SensorUpdateEvent) -> Option<SensorUpdateEvent> {
        self.entries.insert(event.sensor_id, event)
    }

    pub fn get(&self, sensor_id: SensorId) -> Option<&SensorUpdateEvent> {
        self.entries.get(&sensor_id)
    }

    /// The normalized reading for a sensor, if one has arrived.
    pub fn latest(&self, sensor_id: SensorId) -> Option<LatestReading> {
        self.get(sensor_id).map(normalize_event)
    }

    pub fn contains(&self, sensor_id: SensorId) -> bool {
        self.entries.contains_key(&sensor_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorUpdateEvent> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Folds a batch of events in, in order.
    pub fn seed<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = SensorUpdateEvent>,
    {
        for event in events {
            self.upsert(event);
        }
    }
}

/// Connectivity as seen by consumers of the live feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStatus {
    pub connected: bool,
    /// The last error, already phrased for display.
    pub error: Option<String>,
}

/// Collects the realtime stream into a [`LiveTable`].
///
/// Every change bumps a revision published on a `watch` channel, so views
/// can rebuild whenever the table moves.
///
/// Once closed the feed drops whatever still arrives until it is reopened,
/// so an update racing a disconnect cannot land after the table is cleared.
pub struct LiveFeed {
    table: RwLock<LiveTable>,
    /// Only written while holding the table's write lock.
    closed: AtomicBool,
    status: watch::Sender<FeedStatus>,
    revision: watch::Sender<u64>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeed {
    pub fn new() -> Self {
        let (status, _) = watch::channel(FeedStatus::default());
        let (revision, _) = watch::channel(0);
        Self {
            table: RwLock::new(LiveTable::new()),
            closed: AtomicBool::new(false),
            status,
            revision,
        }
    }

    /// Read access to the table.
    pub fn table(&self) -> RwLockReadGuard<'_, LiveTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    /// A receiver that changes whenever the table does.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Folds in the result of a one-shot latest readings pull.
    pub fn seed(&self, events: Vec<SensorUpdateEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(mut table) = self.writable() else {
            tracing::debug!("Dropping {} seeded readings, feed is closed", events.len());
            return;
        };
        table.seed(events);
        drop(table);
        self.bump();
    }

    /// Empties the table and ignores further updates until [`LiveFeed::reopen`].
    pub fn close(&self) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        table.clear();
        drop(table);
        self.bump();
    }

    pub fn reopen(&self) {
        let _table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(false, Ordering::SeqCst);
    }

    /// The table's write guard, unless the feed is closed.
    fn writable(&self) -> Option<RwLockWriteGuard<'_, LiveTable>> {
        let table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        (!self.closed.load(Ordering::SeqCst)).then_some(table)
    }

    pub(crate) fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl RealtimeObserver for LiveFeed {
    fn on_connect(&self) {
        self.reopen();
        self.status.send_replace(FeedStatus {
            connected: true,
            error: None,
        });
    }

    fn on_disconnect(&self) {
        self.status.send_modify(|status| status.connected = false);
        self.close();
    }

    fn on_error(&self, error: &AppError) {
        let message = error.report();
        self.status.send_modify(|status| {
            // The connection survives an unreadable message.
            if !matches!(error, AppError::MalformedEvent(_)) {
                status.connected = false;
            }
            status.error = Some(message);
        });
    }

    fn on_sensor_update(&self, event: SensorUpdateEvent) {
        tracing::debug!(
            "📈 Sensor {} ({}) = {:?}{}",
            event.sensor_id,
            event.sensor_type,
            event.value,
            if event.is_alert { " ALERT" } else { "" }
        );
        let Some(mut table) = self.writable() else {
            return;
        };
        table.upsert(event);
        drop(table);
        self.bump();
    }
}

enum RawValue<'a> {
    Number(f64),
    Text(&'a str),
    Bool(bool),
    Missing,
}

impl<'a> RawValue<'a> {
    fn from_json(value: Option<&'a Value>) -> Self {
        let Some(value) = value else {
            return RawValue::Missing;
        };
        if let Some(b) = value.as_bool() {
            RawValue::Bool(b)
        } else if let Some(n) = value.as_f64() {
            RawValue::Number(n)
        } else if let Some(s) = value.as_str() {
            RawValue::Text(s)
        } else {
            RawValue::Missing
        }
    }

    fn from_event(value: &'a SensorValue) -> Self {
        match value {
            SensorValue::Number(n) => RawValue::Number(*n),
            SensorValue::Text(s) => RawValue::Text(s),
        }
    }
}

/// Maps a raw value onto the numeric scale of its sensor kind.
///
/// On/off kinds come out as exactly 0.0 or 1.0: the kind's "on" word (any
/// case), `true` or a non-zero number mean 1.0; anything else means 0.0.
fn coerce(kind: SensorKind, raw: RawValue<'_>) -> Option<f64> {
    match kind.on_word() {
        Some(on_word) => {
            let on = match raw {
                RawValue::Text(s) => s.trim().eq_ignore_ascii_case(on_word),
                RawValue::Bool(b) => b,
                RawValue::Number(n) => n != 0.0,
                RawValue::Missing => false,
            };
            Some(if on { 1.0 } else { 0.0 })
        }
        None => match raw {
            RawValue::Number(n) => Some(n),
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Bool(_) | RawValue::Missing => None,
        },
    }
}

/// Normalizes a stream event.
pub fn normalize_event(event: &SensorUpdateEvent) -> LatestReading {
    LatestReading {
        value: coerce(event.sensor_kind(), RawValue::from_event(&event.value)),
        timestamp: event.timestamp(),
        is_alert: event.is_alert,
    }
}

/// Normalizes one REST reading object, whose value sits under a field named
/// after the sensor kind (or under `value`).
pub fn normalize_reading(kind: SensorKind, reading: &Value) -> LatestReading {
    let value = reading
        .get(kind.field_name())
        .filter(|v| !v.is_null())
        .or_else(|| reading.get("value"));

    let timestamp = ["timestamp", "created_at"]
        .iter()
        .find_map(|field| reading.get(*field).and_then(parse_timestamp));

    let is_alert = ["is_alert", "isAlert"]
        .iter()
        .find_map(|field| reading.get(*field).and_then(|v| v.as_bool()))
        .unwrap_or(false);

    LatestReading {
        value: coerce(kind, RawValue::from_json(value)),
        timestamp,
        is_alert,
    }
}

/// The normalized most recent REST reading of a sensor.
pub fn latest_rest_reading(sensor: &Sensor) -> Option<LatestReading> {
    let kind = SensorKind::parse(&sensor.sensor_type);
    sensor
        .recent_readings
        .last()
        .map(|reading| normalize_reading(kind, reading))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = value.as_f64() {
        return ms.is_finite().then(|| DateTime::from_timestamp_millis(ms as i64))?;
    }
    let raw = value.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
