use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sonic_rs::{JsonValueTrait, Value};

/// A reference to a parent entity: either a bare id or an embedded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Id(i64),
    Embedded {
        id: i64,
        #[serde(default)]
        name: Option<String>,
    },
}

impl EntityRef {
    /// The referenced id.
    pub fn id(&self) -> i64 {
        match self {
            EntityRef::Id(id) | EntityRef::Embedded { id, .. } => *id,
        }
    }

    /// The referenced name, when the backend embedded one.
    pub fn name(&self) -> Option<&str> {
        match self {
            EntityRef::Id(_) => None,
            EntityRef::Embedded { name, .. } => name.as_deref(),
        }
    }
}

/// Resolves a parent id from an explicit id field or an embedded reference.
fn parent_id(explicit: Option<i64>, embedded: Option<&EntityRef>) -> Option<i64> {
    explicit.or_else(|| embedded.map(EntityRef::id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct District {
    pub id: i64,
    pub name: String,
    #[serde(default, alias = "region_id", skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    #[serde(default, skip_serializing)]
    pub region: Option<EntityRef>,
}

impl District {
    pub fn parent_id(&self) -> Option<i64> {
        parent_id(self.region_id, self.region.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depot {
    pub id: i64,
    pub name: String,
    #[serde(default, alias = "district_id", skip_serializing_if = "Option::is_none")]
    pub district_id: Option<i64>,
    #[serde(default, skip_serializing)]
    pub district: Option<EntityRef>,
}

impl Depot {
    pub fn parent_id(&self) -> Option<i64> {
        parent_id(self.district_id, self.district.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformer {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default = "default_active", alias = "is_active")]
    pub is_active: bool,
    #[serde(default, alias = "depot_id", skip_serializing_if = "Option::is_none")]
    pub depot_id: Option<i64>,
    #[serde(default, skip_serializing)]
    pub depot: Option<EntityRef>,
}

impl Transformer {
    pub fn parent_id(&self) -> Option<i64> {
        parent_id(self.depot_id, self.depot.as_ref())
    }
}

/// A sensor as returned by the REST collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", alias = "sensor_type", alias = "sensorType")]
    pub sensor_type: String,
    #[serde(default, alias = "transformer_id", skip_serializing_if = "Option::is_none")]
    pub transformer_id: Option<i64>,
    #[serde(default, skip_serializing)]
    pub transformer: Option<EntityRef>,
    /// Readings ordered oldest first; each is a loosely-typed object whose
    /// value field depends on the sensor type.
    #[serde(default, alias = "recent_readings", skip_serializing)]
    pub recent_readings: Vec<Value>,
}

impl Sensor {
    pub fn parent_id(&self) -> Option<i64> {
        parent_id(self.transformer_id, self.transformer.as_ref())
    }
}

fn default_active() -> bool {
    true
}

/// The keys a collection response may wrap its array under, in priority order.
pub const LIST_KEYS: [&str; 4] = ["data", "content", "items", "records"];

/// Decodes a collection response body into a canonical list.
///
/// The body is either a bare array or an object holding the array under one
/// of [`LIST_KEYS`]; the first key holding an array wins and an object
/// without one yields an empty list. An array whose elements do not decode
/// is an error, never an empty list.
pub fn decode_list<T: DeserializeOwned>(body: &[u8]) -> crate::error::Result<Vec<T>> {
    let payload: Value = sonic_rs::from_slice(body)?;
    if payload.is_object() {
        return match LIST_KEYS
            .iter()
            .find_map(|key| payload.get(*key).filter(|v| v.is_array()))
        {
            Some(items) => Ok(sonic_rs::from_value(items)?),
            None => Ok(Vec::new()),
        };
    }
    // Anything but an array fails here as well.
    Ok(sonic_rs::from_value(&payload)?)
}

/// Reads an array field of an object, treating a missing or non-array
/// value as empty.
pub fn list_field<T: DeserializeOwned>(object: &Value, key: &str) -> crate::error::Result<Vec<T>> {
    match object.get(key).filter(|v| v.is_array()) {
        Some(items) => Ok(sonic_rs::from_value(items)?),
        None => Ok(Vec::new()),
    }
}

/// The REST-fetched structural snapshot the live feed is overlaid on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HierarchySnapshot {
    pub regions: Vec<Region>,
    pub districts: Vec<District>,
    pub depots: Vec<Depot>,
    pub transformers: Vec<Transformer>,
    pub sensors: Vec<Sensor>,
}
