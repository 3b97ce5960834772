use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a sensor, shared by REST entities and stream events.
pub type SensorId = i64;

/// The only kind of message the realtime stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "sensor_update")]
    SensorUpdate,
}

/// A raw reading value: numeric sensors send numbers, binary sensors
/// usually send words such as `"closed"` or `"detected"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
}

/// One push notification describing a new reading for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdateEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub sensor_type: String,
    pub transformer_id: i64,
    pub transformer_name: String,
    pub depot_name: String,
    pub region_name: String,
    pub value: SensorValue,
    pub is_alert: bool,
    /// Milliseconds since the Unix epoch, as stamped by the publisher.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: f64,
}

impl SensorUpdateEvent {
    /// The publisher's timestamp, if it is representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp_ms.is_finite() {
            return None;
        }
        DateTime::from_timestamp_millis(self.timestamp_ms as i64)
    }

    /// The sensor kind this event reports for.
    pub fn sensor_kind(&self) -> SensorKind {
        SensorKind::parse(&self.sensor_type)
    }
}

/// The sensor types the backend knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    OilLevel,
    Pressure,
    Current,
    Voltage,
    Humidity,
    Contact,
    Motion,
    Video,
    Tilt,
    Other,
}

impl SensorKind {
    /// Parses a sensor type string; unknown types map to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "temperature" => SensorKind::Temperature,
            "oil_level" => SensorKind::OilLevel,
            "pressure" => SensorKind::Pressure,
            "current" => SensorKind::Current,
            "voltage" => SensorKind::Voltage,
            "humidity" => SensorKind::Humidity,
            "contact" => SensorKind::Contact,
            "motion" => SensorKind::Motion,
            "video" => SensorKind::Video,
            "tilt" => SensorKind::Tilt,
            _ => SensorKind::Other,
        }
    }

    /// The field a reading of this kind carries its value under.
    pub fn field_name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::OilLevel => "oil_level",
            SensorKind::Pressure => "pressure",
            SensorKind::Current => "current",
            SensorKind::Voltage => "voltage",
            SensorKind::Humidity => "humidity",
            SensorKind::Contact => "contact",
            SensorKind::Motion => "motion",
            SensorKind::Video => "video",
            SensorKind::Tilt => "tilt",
            SensorKind::Other => "value",
        }
    }

    /// For on/off sensors, the word that means "on".
    pub fn on_word(self) -> Option<&'static str> {
        match self {
            SensorKind::Contact => Some("closed"),
            SensorKind::Motion | SensorKind::Video => Some("detected"),
            _ => None,
        }
    }

    /// Whether readings of this kind are coerced to 0/1.
    pub fn is_binary(self) -> bool {
        self.on_word().is_some()
    }
}

/// A reading in the uniform shape every sensor kind is normalized to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    /// The numeric value; binary kinds are 0.0 or 1.0. `None` when a
    /// numeric sensor sent something that is not a number.
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_alert: bool,
}
