//! Periodic offline analyzer over the event log: location routines, health
//! trends, battery patterns, and rolling event statistics.

use crate::context::ContextStore;
use crate::event_log::EventLog;
use crate::model::{
    BatteryPatterns, Decision, Epoch, EventLogEntry, EventStats, HealthTrends, LocationRoutines, MetricTrend,
    Patterns, Trend, ZoneRoutine,
};
use crate::time_util::{format_hh_mm, local_day_of_week, local_hour_fraction, median, now_epoch};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const SCAN_PERIOD: Duration = Duration::from_secs(6 * 3600);
const SEVEN_DAYS: f64 = 7.0 * 86_400.0;

pub struct PatternEngine {
    context: ContextStore,
    event_log: EventLog,
    window_days: u32,
}

impl PatternEngine {
    pub fn new(context: ContextStore, event_log: EventLog, window_days: u32) -> Self {
        Self { context, event_log, window_days }
    }

    pub async fn run_once(&self, now: Epoch) {
        let since = now - self.window_days as f64 * 86_400.0;
        let entries = match self.event_log.read_since(since).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("pattern engine failed to read event log: {e}");
                return;
            }
        };

        {
            let _guard = self.context.lock_patterns().await;
            let existing = self.context.read_patterns().await;
            let patterns = compute_patterns(&entries, &existing, now);
            if let Err(e) = self.context.write_patterns(&patterns).await {
                error!("pattern engine failed to write patterns: {e}");
            }
        }

        match self.event_log.rotate(now).await {
            Ok(0) => {}
            Ok(dropped) => debug!("pattern engine rotated the event log, dropped {dropped} entries"),
            Err(e) => error!("pattern engine failed to rotate event log: {e}"),
        }
    }

    /// Runs immediately, then every 6 hours, for as long as the returned
    /// handle is alive. Dropping the handle (or aborting it) stops the loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCAN_PERIOD);
            loop {
                interval.tick().await;
                self.run_once(now_epoch()).await;
            }
        })
    }
}

/// Pure computation, exposed for direct testing against the event log shape.
pub fn compute_patterns(entries: &[EventLogEntry], existing: &Patterns, now: Epoch) -> Patterns {
    Patterns {
        location_routines: compute_location_routines(entries),
        health_trends: compute_health_trends(entries, now),
        battery_patterns: compute_battery_patterns(entries),
        event_stats: compute_event_stats(entries, now),
        trigger_cooldowns: existing.trigger_cooldowns.clone(),
        computed_at: Some(now),
    }
}

fn compute_location_routines(entries: &[EventLogEntry]) -> LocationRoutines {
    let mut weekday_enters: HashMap<String, Vec<f64>> = HashMap::new();
    let mut weekday_exits: HashMap<String, Vec<f64>> = HashMap::new();
    let mut weekend_enters: HashMap<String, Vec<f64>> = HashMap::new();
    let mut weekend_exits: HashMap<String, Vec<f64>> = HashMap::new();

    for entry in entries.iter().filter(|e| e.event.source == "geofence.triggered") {
        let zone = entry.event.metadata_get("zoneName").unwrap_or("Unknown").to_string();
        let transition = entry.event.metadata_get("transition").unwrap_or("enter");
        let dow = local_day_of_week(entry.event.fired_at);
        let hour = local_hour_fraction(entry.event.fired_at);
        let is_weekend = dow == 0 || dow == 6;

        let (enters, exits) =
            if is_weekend { (&mut weekend_enters, &mut weekend_exits) } else { (&mut weekday_enters, &mut weekday_exits) };
        if transition == "enter" {
            enters.entry(zone).or_default().push(hour);
        } else {
            exits.entry(zone).or_default().push(hour);
        }
    }

    LocationRoutines {
        weekday: build_routines(&weekday_enters, &weekday_exits),
        weekend: build_routines(&weekend_enters, &weekend_exits),
    }
}

fn build_routines(enters: &HashMap<String, Vec<f64>>, exits: &HashMap<String, Vec<f64>>) -> Vec<ZoneRoutine> {
    let mut zones: Vec<String> = enters.keys().chain(exits.keys()).cloned().collect();
    zones.sort();
    zones.dedup();
    zones
        .into_iter()
        .map(|zone| {
            let typical_arrive = enters.get(&zone).cloned().and_then(median).map(format_hh_mm);
            let typical_leave = exits.get(&zone).cloned().and_then(median).map(format_hh_mm);
            ZoneRoutine { zone, typical_arrive, typical_leave }
        })
        .collect()
}

fn compute_health_trends(entries: &[EventLogEntry], now: Epoch) -> HealthTrends {
    let health_entries: Vec<&EventLogEntry> = entries.iter().filter(|e| e.event.source.starts_with("health")).collect();
    HealthTrends {
        steps: metric_trend(&health_entries, now, "stepsToday", false),
        sleep: metric_trend(&health_entries, now, "sleepDurationSeconds", false),
        resting_heart_rate: metric_trend(&health_entries, now, "restingHeartRate", true),
    }
}

fn metric_trend(entries: &[&EventLogEntry], now: Epoch, field: &str, invert: bool) -> MetricTrend {
    let recent_cutoff = now - SEVEN_DAYS;
    let recent: Vec<f64> = entries.iter().filter(|e| e.timestamp >= recent_cutoff).filter_map(|e| e.event.data_get(field)).collect();
    let all: Vec<f64> = entries.iter().filter_map(|e| e.event.data_get(field)).collect();

    let avg7d = average(&recent);
    let avg30d = average(&all);
    MetricTrend { avg7d, avg30d, trend: classify_trend(avg7d, avg30d, invert) }
}

fn classify_trend(recent: Option<f64>, baseline: Option<f64>, invert: bool) -> Trend {
    match (recent, baseline) {
        (Some(r), Some(b)) if b != 0.0 => {
            let ratio = r / b;
            let (improving, declining) = if invert { (ratio < 0.9, ratio > 1.1) } else { (ratio > 1.1, ratio < 0.9) };
            if improving {
                Trend::Improving
            } else if declining {
                Trend::Declining
            } else {
                Trend::Stable
            }
        }
        _ => Trend::Absent,
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// "Low battery events" are push-eligible battery-low/critical subscriptions
/// regardless of their eventual decision — the frequency tracks how often
/// the device *reports* low battery, not how often it got pushed.
fn compute_battery_patterns(entries: &[EventLogEntry]) -> BatteryPatterns {
    if entries.is_empty() {
        return BatteryPatterns::default();
    }
    let first = entries.first().expect("non-empty").timestamp;
    let last = entries.last().expect("non-empty").timestamp;
    let day_span = ((last - first) / 86_400.0).max(1.0);
    let low_battery_events = entries
        .iter()
        .filter(|e| matches!(e.event.subscription_id.as_str(), "default.battery-low" | "default.battery-critical"))
        .count();
    BatteryPatterns {
        avg_drain_per_hour: None,
        typical_charge_time: None,
        low_battery_frequency: Some(low_battery_events as f64 / day_span),
    }
}

fn compute_event_stats(entries: &[EventLogEntry], now: Epoch) -> EventStats {
    let cutoff = now - SEVEN_DAYS;
    let recent: Vec<&EventLogEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).collect();
    let total = recent.len();
    let pushes = recent.iter().filter(|e| e.decision == Decision::Push).count();
    let drops = recent.iter().filter(|e| e.decision == Decision::Drop).count();
    let drop_rate = if total == 0 { 0.0 } else { drops as f64 / total as f64 };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in &recent {
        *counts.entry(entry.event.source.clone()).or_insert(0) += 1;
    }
    let mut sources: Vec<(String, usize)> = counts.into_iter().collect();
    sources.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top_sources = sources.into_iter().take(5).map(|(source, _)| source).collect();

    EventStats { events_per_day: total as f64 / 7.0, pushes_per_day: pushes as f64 / 7.0, drop_rate, top_sources }
}
