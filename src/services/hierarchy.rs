use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::models::hierarchy::HierarchySnapshot;
use crate::models::telemetry::{LatestReading, SensorKind};
use crate::services::telemetry::{LiveTable, latest_rest_reading};

pub const UNKNOWN_REGION: &str = "Unknown Region";
pub const UNKNOWN_DISTRICT: &str = "Unknown District";
pub const UNKNOWN_DEPOT: &str = "Unknown Depot";

/// One sensor with its latest reading overlaid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub id: i64,
    pub name: String,
    pub kind: SensorKind,
    pub latest: Option<LatestReading>,
    /// Whether `latest` came from the live stream rather than the snapshot.
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerStatus {
    pub id: i64,
    pub name: String,
    pub capacity: Option<f64>,
    pub is_active: bool,
    pub sensor_count: usize,
    pub alert_count: usize,
    pub sensors: Vec<SensorStatus>,
}

/// Transformers grouped by depot, within district, within region. Names
/// key every level; transformers keep snapshot order.
pub type DepotMap = BTreeMap<String, Vec<TransformerStatus>>;
pub type DistrictMap = BTreeMap<String, DepotMap>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedHierarchyView {
    pub regions: BTreeMap<String, DistrictMap>,
}

impl DerivedHierarchyView {
    /// Every transformer with the region, district and depot it was placed under.
    pub fn transformers(&self) -> impl Iterator<Item = (&str, &str, &str, &TransformerStatus)> {
        self.regions.iter().flat_map(|(region, districts)| {
            districts.iter().flat_map(move |(district, depots)| {
                depots.iter().flat_map(move |(depot, transformers)| {
                    transformers
                        .iter()
                        .map(move |t| (region.as_str(), district.as_str(), depot.as_str(), t))
                })
            })
        })
    }

    pub fn transformer_count(&self) -> usize {
        self.transformers().count()
    }
}

/// Rebuilds the grouped view from the snapshot and the live table.
///
/// The snapshot supplies the structure, the live table only the sensor
/// values. A transformer whose chain of parents breaks is still shown, under
/// placeholder names from the break downwards.
pub fn build_view(snapshot: &HierarchySnapshot, live: &LiveTable) -> DerivedHierarchyView {
    let regions: HashMap<i64, &str> = snapshot
        .regions
        .iter()
        .map(|r| (r.id, r.name.as_str()))
        .collect();
    let districts: HashMap<i64, (&str, Option<i64>)> = snapshot
        .districts
        .iter()
        .map(|d| (d.id, (d.name.as_str(), d.parent_id())))
        .collect();
    let depots: HashMap<i64, (&str, Option<i64>)> = snapshot
        .depots
        .iter()
        .map(|d| (d.id, (d.name.as_str(), d.parent_id())))
        .collect();

    let mut sensors_by_transformer: HashMap<i64, Vec<SensorStatus>> = HashMap::new();
    for sensor in &snapshot.sensors {
        let Some(transformer_id) = sensor.parent_id() else {
            continue;
        };
        let (latest, is_live) = match live.latest(sensor.id) {
            Some(reading) => (Some(reading), true),
            None => (latest_rest_reading(sensor), false),
        };
        sensors_by_transformer
            .entry(transformer_id)
            .or_default()
            .push(SensorStatus {
                id: sensor.id,
                name: sensor.name.clone(),
                kind: SensorKind::parse(&sensor.sensor_type),
                latest,
                live: is_live,
            });
    }

    let mut view = DerivedHierarchyView::default();
    for transformer in &snapshot.transformers {
        let depot = transformer.parent_id().and_then(|id| depots.get(&id));
        let district = depot
            .and_then(|(_, district_id)| *district_id)
            .and_then(|id| districts.get(&id));
        let region = district
            .and_then(|(_, region_id)| *region_id)
            .and_then(|id| regions.get(&id));

        let depot_name = depot.map_or(UNKNOWN_DEPOT, |(name, _)| *name);
        let district_name = district.map_or(UNKNOWN_DISTRICT, |(name, _)| *name);
        let region_name = region.copied().unwrap_or(UNKNOWN_REGION);

        let sensors = sensors_by_transformer
            .remove(&transformer.id)
            .unwrap_or_default();
        let alert_count = sensors
            .iter()
            .filter(|s| s.latest.as_ref().is_some_and(|r| r.is_alert))
            .count();

        view.regions
            .entry(region_name.to_string())
            .or_default()
            .entry(district_name.to_string())
            .or_default()
            .entry(depot_name.to_string())
            .or_default()
            .push(TransformerStatus {
                id: transformer.id,
                name: transformer.name.clone(),
                capacity: transformer.capacity,
                is_active: transformer.is_active,
                sensor_count: sensors.len(),
                alert_count,
                sensors,
            });
    }

    view
}

/// Fleet-wide totals shown above the grouped view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_regions: usize,
    pub total_districts: usize,
    pub total_depots: usize,
    pub total_transformers: usize,
    pub total_sensors: usize,
    pub active_transformers: usize,
    pub inactive_transformers: usize,
    pub live_sensors: usize,
    pub alerting_sensors: usize,
}

impl DashboardStats {
    pub fn collect(snapshot: &HierarchySnapshot, live: &LiveTable) -> Self {
        let active = snapshot.transformers.iter().filter(|t| t.is_active).count();
        Self {
            total_regions: snapshot.regions.len(),
            total_districts: snapshot.districts.len(),
            total_depots: snapshot.depots.len(),
            total_transformers: snapshot.transformers.len(),
            total_sensors: snapshot.sensors.len(),
            active_transformers: active,
            inactive_transformers: snapshot.transformers.len() - active,
            live_sensors: live.len(),
            alerting_sensors: live.iter().filter(|event| event.is_alert).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hierarchy::{Depot, District, Region, Sensor, Transformer};
    use crate::models::telemetry::{EventKind, SensorUpdateEvent, SensorValue};

    fn snapshot() -> HierarchySnapshot {
        HierarchySnapshot {
            regions: vec![Region { id: 1, name: "Harare".to_string() }],
            districts: vec![District {
                id: 10,
                name: "Central".to_string(),
                region_id: Some(1),
                region: None,
            }],
            depots: vec![Depot {
                id: 100,
                name: "Avondale".to_string(),
                district_id: Some(10),
                district: None,
            }],
            transformers: vec![
                Transformer {
                    id: 1000,
                    name: "TX-1".to_string(),
                    capacity: Some(500.0),
                    is_active: true,
                    depot_id: Some(100),
                    depot: None,
                },
                Transformer {
                    id: 1001,
                    name: "TX-orphan".to_string(),
                    capacity: None,
                    is_active: false,
                    depot_id: Some(999),
                    depot: None,
                },
            ],
            sensors: vec![
                Sensor {
                    id: 7,
                    name: "Top oil".to_string(),
                    sensor_type: "temperature".to_string(),
                    transformer_id: Some(1000),
                    transformer: None,
                    recent_readings: vec![sonic_rs::from_str(r#"{"temperature":40.0}"#).unwrap()],
                },
                Sensor {
                    id: 8,
                    name: "Door".to_string(),
                    sensor_type: "contact".to_string(),
                    transformer_id: Some(1000),
                    transformer: None,
                    recent_readings: Vec::new(),
                },
            ],
        }
    }

    fn update(sensor_id: i64, value: f64, is_alert: bool) -> SensorUpdateEvent {
        SensorUpdateEvent {
            kind: EventKind::SensorUpdate,
            sensor_id,
            sensor_name: "Top oil".to_string(),
            sensor_type: "temperature".to_string(),
            transformer_id: 1000,
            transformer_name: "TX-1".to_string(),
            depot_name: "Avondale".to_string(),
            region_name: "Harare".to_string(),
            value: SensorValue::Number(value),
            is_alert,
            timestamp_ms: 1_700_000_000_000.0,
        }
    }

    #[test]
    fn groups_by_region_district_and_depot() {
        let view = build_view(&snapshot(), &LiveTable::new());
        let transformers = &view.regions["Harare"]["Central"]["Avondale"];
        assert_eq!(transformers.len(), 1);
        assert_eq!(transformers[0].sensor_count, 2);
        assert_eq!(transformers[0].sensors[0].latest.as_ref().unwrap().value, Some(40.0));
        assert!(!transformers[0].sensors[0].live);
    }

    #[test]
    fn unresolvable_depot_falls_under_placeholders() {
        let view = build_view(&snapshot(), &LiveTable::new());
        let orphans = &view.regions[UNKNOWN_REGION][UNKNOWN_DISTRICT][UNKNOWN_DEPOT];
        assert_eq!(orphans[0].name, "TX-orphan");
        assert_eq!(view.transformer_count(), 2);
    }

    #[test]
    fn rebuilding_from_the_same_inputs_is_stable() {
        let snapshot = snapshot();
        let live = LiveTable::new();
        assert_eq!(build_view(&snapshot, &live), build_view(&snapshot, &live));
    }

    #[test]
    fn live_values_overlay_the_snapshot() {
        let mut live = LiveTable::new();
        live.upsert(update(7, 58.0, true));
        let view = build_view(&snapshot(), &live);
        let tx = &view.regions["Harare"]["Central"]["Avondale"][0];
        assert_eq!(tx.sensors[0].latest.as_ref().unwrap().value, Some(58.0));
        assert!(tx.sensors[0].live);
        assert_eq!(tx.alert_count, 1);

        let stats = DashboardStats::collect(&snapshot(), &live);
        assert_eq!(stats.total_transformers, 2);
        assert_eq!(stats.active_transformers, 1);
        assert_eq!(stats.inactive_transformers, 1);
        assert_eq!(stats.alerting_sensors, 1);
    }
}
