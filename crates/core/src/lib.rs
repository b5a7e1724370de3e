//! binsight core types: telemetry events, fleet records and the snapshot.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

pub type BinId = String;
pub type TruckId = String;

/// Retained activity entries (newest first); older entries are discarded.
pub const ACTIVITY_LOG_CAP: usize = 10;

/// Fill level (percent) at or above which a bin is critical.
pub const CRITICAL_FILL_PCT: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TruckStatus {
    Idle,
    EnRoute,
    Collecting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BinStatus {
    Normal,
    Critical,
}

impl BinStatus {
    /// Derived from the fill level at reconciliation time; never stored
    /// independently of it.
    pub fn from_fill(fill_level: u8) -> Self {
        if fill_level >= CRITICAL_FILL_PCT {
            BinStatus::Critical
        } else {
            BinStatus::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Collection,
    Alert,
    Route,
    Maintenance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorHealth {
    Online,
    Offline,
}

// ---- Event payloads (wire shapes; a real transport republishes these) ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BinUpdate {
    pub bin_id: BinId,
    /// Integer percent, 0..=100.
    pub fill_level: u8,
    /// Degrees Celsius.
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TruckUpdate {
    pub truck_id: TruckId,
    pub location: GeoPoint,
    pub status: TruckStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub message: String,
    pub bin_id: Option<BinId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub kind: ActivityKind,
    pub message: String,
    pub bin_id: Option<BinId>,
    pub truck_id: Option<TruckId>,
    pub timestamp: DateTime<Utc>,
}

/// Discriminated telemetry event. The kind tag replaces the source feed's
/// field-presence dispatch and is matched exhaustively at reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Event {
    BinUpdate(BinUpdate),
    TruckUpdate(TruckUpdate),
    Alert(AlertPayload),
    Activity(ActivityPayload),
}

/// Subscription key for the event channel; closed set in this system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    BinUpdate,
    TruckUpdate,
    Alert,
    Activity,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::BinUpdate,
        EventKind::TruckUpdate,
        EventKind::Alert,
        EventKind::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BinUpdate => "binUpdate",
            EventKind::TruckUpdate => "truckUpdate",
            EventKind::Alert => "alert",
            EventKind::Activity => "activity",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BinUpdate(_) => EventKind::BinUpdate,
            Event::TruckUpdate(_) => EventKind::TruckUpdate,
            Event::Alert(_) => EventKind::Alert,
            Event::Activity(_) => EventKind::Activity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::BinUpdate(p) => p.timestamp,
            Event::TruckUpdate(p) => p.timestamp,
            Event::Alert(p) => p.timestamp,
            Event::Activity(p) => p.timestamp,
        }
    }

    /// Reject payloads a well-formed producer cannot emit. Reconciliation
    /// fails closed on these: the event is skipped and the snapshot stays
    /// unchanged.
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        match self {
            Event::BinUpdate(p) => {
                if p.bin_id.is_empty() {
                    return Err(InvalidEvent::EmptyId("binId"));
                }
                if p.fill_level > 100 {
                    return Err(InvalidEvent::FillOutOfRange(p.fill_level));
                }
                if !p.temperature.is_finite() {
                    return Err(InvalidEvent::NonFinite("temperature"));
                }
            }
            Event::TruckUpdate(p) => {
                if p.truck_id.is_empty() {
                    return Err(InvalidEvent::EmptyId("truckId"));
                }
                if !p.location.lat.is_finite() || !p.location.lng.is_finite() {
                    return Err(InvalidEvent::NonFinite("location"));
                }
            }
            Event::Alert(p) => {
                if p.message.is_empty() {
                    return Err(InvalidEvent::EmptyMessage);
                }
            }
            Event::Activity(p) => {
                if p.message.is_empty() {
                    return Err(InvalidEvent::EmptyMessage);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidEvent {
    #[error("empty {0}")]
    EmptyId(&'static str),
    #[error("fill level out of range: {0}")]
    FillOutOfRange(u8),
    #[error("non-finite {0}")]
    NonFinite(&'static str),
    #[error("empty message")]
    EmptyMessage,
}

// ---- Fleet records (snapshot entries) ----

/// A monitored bin. Reading fields (`fill_level`, `temperature`, `status`,
/// `last_reading`) are replaced wholesale on every `binUpdate`; roster fields
/// (`location`, `address`, `sensor_health`) survive reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinRecord {
    pub id: BinId,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub sensor_health: SensorHealth,
    pub fill_level: u8,
    pub temperature: f64,
    pub status: BinStatus,
    pub last_reading: Option<DateTime<Utc>>,
}

impl BinRecord {
    /// Fresh record for a bin first seen via a live event (upsert path).
    pub fn unseen(id: BinId) -> Self {
        Self {
            id,
            location: None,
            address: None,
            sensor_health: SensorHealth::Online,
            fill_level: 0,
            temperature: 0.0,
            status: BinStatus::Normal,
            last_reading: None,
        }
    }
}

/// A fleet vehicle. `location`, `status` and `last_update` are replaced on
/// every `truckUpdate`; the roster fields are preserved from the prior entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TruckRecord {
    pub id: TruckId,
    pub driver: Option<String>,
    pub route: Option<String>,
    pub capacity_kg: u32,
    pub current_load_kg: u32,
    pub assigned_bins: SmallVec<[BinId; 8]>,
    pub location: Option<GeoPoint>,
    pub status: TruckStatus,
    pub last_update: Option<DateTime<Utc>>,
}

impl TruckRecord {
    pub fn unseen(id: TruckId) -> Self {
        Self {
            id,
            driver: None,
            route: None,
            capacity_kg: 0,
            current_load_kg: 0,
            assigned_bins: SmallVec::new(),
            location: None,
            status: TruckStatus::Idle,
            last_update: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    pub id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub bin_id: Option<BinId>,
    pub timestamp: DateTime<Utc>,
    /// Defaults false; flipping it is a UI action, never done by the core.
    pub read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub message: String,
    pub bin_id: Option<BinId>,
    pub truck_id: Option<TruckId>,
    pub timestamp: DateTime<Utc>,
}

/// The complete application state at one version. Immutable once frozen;
/// every applied event yields a new value, so readers never observe a
/// partially updated aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetSnapshot {
    pub epoch: u64,
    pub bins: FxHashMap<BinId, BinRecord>,
    pub trucks: FxHashMap<TruckId, TruckRecord>,
    /// Newest first, unbounded.
    pub alerts: Vec<AlertRecord>,
    /// Newest first, at most [`ACTIVITY_LOG_CAP`] entries.
    pub activity: Vec<ActivityRecord>,
}

/// Aggregate counts the dashboard header renders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub bins_total: usize,
    pub bins_critical: usize,
    pub sensors_online: usize,
    pub trucks_total: usize,
    pub trucks_active: usize,
    pub unread_alerts: usize,
    pub activity_len: usize,
}

impl FleetSnapshot {
    pub fn stats(&self) -> FleetStats {
        FleetStats {
            bins_total: self.bins.len(),
            bins_critical: self
                .bins
                .values()
                .filter(|b| b.status == BinStatus::Critical)
                .count(),
            sensors_online: self
                .bins
                .values()
                .filter(|b| b.sensor_health == SensorHealth::Online)
                .count(),
            trucks_total: self.trucks.len(),
            trucks_active: self
                .trucks
                .values()
                .filter(|t| t.status != TruckStatus::Idle)
                .count(),
            unread_alerts: self.alerts.iter().filter(|a| !a.read).count(),
            activity_len: self.activity.len(),
        }
    }
}

pub mod prelude {
    pub use super::{
        ActivityKind, ActivityPayload, ActivityRecord, AlertKind, AlertPayload, AlertRecord,
        BinId, BinRecord, BinStatus, BinUpdate, Event, EventKind, FleetSnapshot, FleetStats,
        GeoPoint, SensorHealth, TruckId, TruckRecord, TruckStatus, TruckUpdate,
    };
}
