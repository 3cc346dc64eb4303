//! Value types shared across the pipeline: events, context, log entries, patterns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seconds since the Unix epoch, as a float (device clocks report sub-second precision).
pub type Epoch = f64;

/// Raw telemetry from the companion app. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub subscription_id: String,
    pub source: String,
    #[serde(default)]
    pub data: HashMap<String, f64>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub fired_at: Epoch,
}

impl DeviceEvent {
    pub fn data_get(&self, key: &str) -> Option<f64> {
        self.data.get(key).copied()
    }

    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.get(key)).map(String::as_str)
    }
}

/// Final disposition of an event, as recorded in the event log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Push,
    Drop,
    Defer,
}

/// Outcome of rule evaluation, before judgment-layer resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Push(String),
    Drop(String),
    Defer(String),
    Ambiguous,
}

impl RuleOutcome {
    pub fn reason(&self) -> Option<&str> {
        match self {
            RuleOutcome::Push(r) | RuleOutcome::Drop(r) | RuleOutcome::Defer(r) => Some(r),
            RuleOutcome::Ambiguous => None,
        }
    }
}

/// One line of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub event: DeviceEvent,
    pub decision: Decision,
    pub reason: String,
    pub timestamp: Epoch,
}

// ---------------------------------------------------------------------
// Device context
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    pub level: f64,
    /// Raw state string as reported by the device (e.g. "charging",
    /// "unplugged", "full"); the spec does not constrain its vocabulary.
    #[serde(default = "default_battery_state")]
    pub state: String,
    #[serde(default)]
    pub is_low_power_mode: bool,
    pub updated_at: Epoch,
}

fn default_battery_state() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationStatus {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    #[serde(default)]
    pub label: Option<String>,
    pub updated_at: Epoch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub steps_today: Option<f64>,
    pub distance_meters: Option<f64>,
    pub heart_rate_avg: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub hrv: Option<f64>,
    pub active_energy_kcal: Option<f64>,
    pub sleep_duration_seconds: Option<f64>,
    pub updated_at: Option<Epoch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub battery: Option<BatteryStatus>,
    pub location: Option<LocationStatus>,
    #[serde(default)]
    pub health: HealthStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneTransition {
    pub from: Option<String>,
    pub to: Option<String>,
    pub at: Epoch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStatus {
    pub current_zone: Option<String>,
    pub zone_entered_at: Option<Epoch>,
    pub last_transition: Option<ZoneTransition>,
    pub is_stationary: bool,
    pub stationary_since: Option<Epoch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaStatus {
    pub last_event_at: Epoch,
    pub events_today: u32,
    pub last_agent_push_at: Option<Epoch>,
    pub pushes_today: u32,
}

/// Mutable snapshot of device state, reconstructed from the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceContext {
    pub device: DeviceStatus,
    pub activity: ActivityStatus,
    pub meta: MetaStatus,
}

// ---------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRoutine {
    pub zone: String,
    pub typical_arrive: Option<String>,
    pub typical_leave: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationRoutines {
    pub weekday: Vec<ZoneRoutine>,
    pub weekend: Vec<ZoneRoutine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    #[default]
    Absent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrend {
    pub avg7d: Option<f64>,
    pub avg30d: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthTrends {
    pub steps: MetricTrend,
    pub sleep: MetricTrend,
    pub resting_heart_rate: MetricTrend,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryPatterns {
    pub avg_drain_per_hour: Option<f64>,
    pub typical_charge_time: Option<String>,
    pub low_battery_frequency: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub events_per_day: f64,
    pub pushes_per_day: f64,
    pub drop_rate: f64,
    pub top_sources: Vec<String>,
}

/// Derived analytics over the event log, recomputed periodically. Distinct
/// from the live `DeviceContext`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patterns {
    pub location_routines: LocationRoutines,
    pub health_trends: HealthTrends,
    pub battery_patterns: BatteryPatterns,
    pub event_stats: EventStats,
    pub trigger_cooldowns: HashMap<String, Epoch>,
    pub computed_at: Option<Epoch>,
}

/// A proactive insight surfaced by the trigger engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProactiveInsight {
    pub id: String,
    pub message: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}
