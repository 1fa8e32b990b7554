//! Per-vessel state: latest snapshot, capped trajectory history, and the
//! coarse grid index used for spatial queries.
//!
//! The store is shared as `Arc<RwLock<VesselStore>>`; the dispatcher is the
//! only writer on the ingest path, so every mutation here is plain
//! synchronous code and the lock is never held across an await.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ais::{PassthroughEvent, StaticEvent, StaticFields};

/// Grid resolution in degrees.
pub const GRID_SIZE: f64 = 0.1;
/// Per-MMSI history bound; oldest points drop first. At the usual ~10 s
/// report interval this is roughly 11 hours of track.
pub const HISTORY_CAP: usize = 4096;
/// Newest points replayed to a freshly attached subscriber.
pub const BACKLOG_CAP: usize = 10_000;

pub type GridCell = (i32, i32);

pub fn grid_cell(lat: f64, lon: f64) -> GridCell {
    (
        (lat / GRID_SIZE).floor() as i32,
        (lon / GRID_SIZE).floor() as i32,
    )
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TransmissionGap,
    PositionJump,
    IdentitySwap,
    SpeedAnomaly,
    CourseChangeAnomaly,
    CircleSpoofing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub mmsi: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
}

/// Rolling behavioural baseline over the most recent valid history points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_std: Option<f64>,
    pub n: usize,
}

/// One enriched, immutable track record. The originating envelope is quoted
/// verbatim under `full_message`, snapshot at creation so later state changes
/// never reach back into already-broadcast points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub mmsi: u32,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigational_status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_of_turn: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_diff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_profile: Option<NormalProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statics: Option<StaticFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    pub full_message: Value,
}

impl HistoryPoint {
    /// Bare record for a static-data message.
    pub fn from_static(ev: &StaticEvent) -> Self {
        Self {
            mmsi: ev.mmsi,
            timestamp: ev.timestamp,
            message_type: ev.kind.as_str().to_string(),
            lat: None,
            lon: None,
            sog: None,
            heading: None,
            true_heading: None,
            navigational_status: None,
            rate_of_turn: None,
            ship_name: ev.ship_name.clone().or_else(|| ev.fields.ship_name.clone()),
            time_diff: None,
            delta_speed: None,
            delta_heading: None,
            normal_profile: None,
            statics: Some(ev.fields.clone()),
            flag: None,
            mid: None,
            alert: None,
            full_message: ev.envelope.clone(),
        }
    }

    /// Bare record for an opaque pass-through message.
    pub fn from_passthrough(ev: &PassthroughEvent) -> Self {
        Self {
            mmsi: ev.mmsi,
            timestamp: ev.timestamp,
            message_type: ev.kind.clone(),
            lat: None,
            lon: None,
            sog: None,
            heading: None,
            true_heading: None,
            navigational_status: None,
            rate_of_turn: None,
            ship_name: ev.ship_name.clone(),
            time_diff: None,
            delta_speed: None,
            delta_heading: None,
            normal_profile: None,
            statics: None,
            flag: None,
            mid: None,
            alert: None,
            full_message: ev.envelope.clone(),
        }
    }
}

/// Latest known state for one vessel. Created on first sighting, never
/// evicted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vessel {
    pub mmsi: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sog: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigational_status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_of_turn: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ship_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<u16>,
    pub statics: StaticFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_profile: Option<NormalProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct VesselStore {
    vessels: HashMap<u32, Vessel>,
    history: HashMap<u32, VecDeque<HistoryPoint>>,
    grid: HashMap<GridCell, HashSet<u32>>,
    cell_of: HashMap<u32, GridCell>,
}

impl VesselStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vessel(&self, mmsi: u32) -> Option<&Vessel> {
        self.vessels.get(&mmsi)
    }

    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    pub fn history(&self, mmsi: u32) -> Option<&VecDeque<HistoryPoint>> {
        self.history.get(&mmsi)
    }

    pub fn last_point(&self, mmsi: u32) -> Option<&HistoryPoint> {
        self.history.get(&mmsi).and_then(VecDeque::back)
    }

    /// Grid cell currently holding the vessel, if it has a position.
    pub fn cell_of(&self, mmsi: u32) -> Option<GridCell> {
        self.cell_of.get(&mmsi).copied()
    }

    /// Moves the vessel to its new grid cell and records the latest
    /// coordinates. A vessel is a member of exactly one cell.
    pub fn upsert_position(
        &mut self,
        mmsi: u32,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(StoreError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(StoreError::LongitudeOutOfRange(lon));
        }

        let new_cell = grid_cell(lat, lon);
        if let Some(old_cell) = self.cell_of.insert(mmsi, new_cell) {
            if old_cell != new_cell {
                if let Some(members) = self.grid.get_mut(&old_cell) {
                    members.remove(&mmsi);
                    if members.is_empty() {
                        self.grid.remove(&old_cell);
                    }
                }
            }
        }
        self.grid.entry(new_cell).or_default().insert(mmsi);

        let vessel = self.vessels.entry(mmsi).or_default();
        vessel.mmsi = mmsi;
        vessel.lat = Some(lat);
        vessel.lon = Some(lon);
        vessel.last_update = Some(timestamp);
        Ok(())
    }

    /// Copies the dynamic fields of a freshly enriched point into the
    /// latest-state snapshot.
    pub fn update_dynamic(&mut self, point: &HistoryPoint) {
        let vessel = self.vessels.entry(point.mmsi).or_default();
        vessel.mmsi = point.mmsi;
        vessel.sog = point.sog;
        vessel.heading = point.heading;
        vessel.navigational_status = point.navigational_status;
        vessel.rate_of_turn = point.rate_of_turn;
        vessel.ship_name = point.ship_name.clone();
        vessel.flag = point.flag.clone();
        vessel.mid = point.mid;
        vessel.normal_profile = point.normal_profile.clone();
        vessel.delta_speed = point.delta_speed;
        vessel.delta_heading = point.delta_heading;
    }

    /// Folds a static-data message into the vessel; fields the message omits
    /// keep their previous value.
    pub fn merge_statics(&mut self, mmsi: u32, fields: &StaticFields) {
        let vessel = self.vessels.entry(mmsi).or_default();
        vessel.mmsi = mmsi;
        vessel.statics.merge(fields);
    }

    pub fn append_history(&mut self, mmsi: u32, point: HistoryPoint) {
        let track = self.history.entry(mmsi).or_default();
        if track.len() == HISTORY_CAP {
            track.pop_front();
        }
        track.push_back(point);
    }

    /// Replaces the alert on the most recently appended point.
    pub fn set_last_alert(&mut self, mmsi: u32, alert: Alert) {
        if let Some(point) = self.history.get_mut(&mmsi).and_then(VecDeque::back_mut) {
            point.alert = Some(alert);
        }
    }

    /// Chronological snapshot of one vessel's track.
    pub fn read_history(&self, mmsi: u32) -> Vec<HistoryPoint> {
        self.history
            .get(&mmsi)
            .map(|track| track.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every known history point, globally time-sorted, truncated to the
    /// newest `BACKLOG_CAP` for subscriber replay.
    pub fn backlog(&self) -> Vec<HistoryPoint> {
        let mut points: Vec<HistoryPoint> = self
            .history
            .values()
            .flat_map(|track| track.iter().cloned())
            .collect();
        points.sort_by_key(|p| p.timestamp);
        if points.len() > BACKLOG_CAP {
            points.drain(..points.len() - BACKLOG_CAP);
        }
        points
    }

    /// Latest states inside the box: candidate cells from the grid, then an
    /// exact coordinate filter. Never returns a vessel twice.
    pub fn spatial_query(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Vec<Vessel> {
        let (lat_lo, lon_lo) = grid_cell(min_lat, min_lon);
        let (lat_hi, lon_hi) = grid_cell(max_lat, max_lon);

        let mut candidates: HashSet<u32> = HashSet::new();
        for lat_idx in lat_lo..=lat_hi {
            for lon_idx in lon_lo..=lon_hi {
                if let Some(members) = self.grid.get(&(lat_idx, lon_idx)) {
                    candidates.extend(members);
                }
            }
        }

        candidates
            .into_iter()
            .filter_map(|mmsi| self.vessels.get(&mmsi))
            .filter(|v| match (v.lat, v.lon) {
                (Some(lat), Some(lon)) => {
                    lat >= min_lat && lat <= max_lat && lon >= min_lon && lon <= max_lon
                }
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Clears every map. Test surface only.
    pub fn reset(&mut self) {
        self.vessels.clear();
        self.history.clear();
        self.grid.clear();
        self.cell_of.clear();
    }
}
