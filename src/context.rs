//! In-memory device context, backed by a JSON snapshot file.
//!
//! Exclusively mutated by the pipeline (event application, push bookkeeping);
//! readers (the pattern/proactive engines, the `get_context` tool) take a
//! point-in-time clone via [`ContextStore::get`] rather than a live reference.

use crate::error::Result;
use crate::model::{
    ActivityStatus, BatteryStatus, DeviceContext, DeviceEvent, Epoch, LocationStatus, Patterns,
    ZoneTransition,
};
use crate::time_util::utc_day;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ContextStore {
    context_path: PathBuf,
    patterns_path: PathBuf,
    context: Arc<RwLock<DeviceContext>>,
    /// Guards the whole read-modify-write span around `patterns.json` so the
    /// pattern engine's 6-hourly compute and the proactive engine's hourly
    /// scan never interleave their writes (SPEC_FULL.md §5).
    patterns_lock: Arc<Mutex<()>>,
}

impl ContextStore {
    pub fn new(context_path: impl Into<PathBuf>, patterns_path: impl Into<PathBuf>) -> Self {
        Self {
            context_path: context_path.into(),
            patterns_path: patterns_path.into(),
            context: Arc::new(RwLock::new(DeviceContext::default())),
            patterns_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Acquires the patterns document lock. Callers must hold the returned
    /// guard across their entire read-then-write span (not just the write),
    /// so that readers and writers of `patterns.json` fully serialize.
    pub async fn lock_patterns(&self) -> MutexGuard<'_, ()> {
        self.patterns_lock.lock().await
    }

    /// Loads the persisted context. Any read or parse failure leaves the
    /// context empty rather than propagating an error.
    pub async fn load(&self) {
        match fs::read_to_string(&self.context_path).await {
            Ok(raw) => match serde_json::from_str::<DeviceContext>(&raw) {
                Ok(ctx) => {
                    *self.context.write().await = ctx;
                    debug!("loaded context from {:?}", self.context_path);
                }
                Err(e) => warn!("context file is corrupt, starting empty: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to read context file, starting empty: {e}"),
        }
    }

    /// Point-in-time copy of the current snapshot.
    pub async fn get(&self) -> DeviceContext {
        self.context.read().await.clone()
    }

    pub async fn update_from_event(&self, event: &DeviceEvent) {
        let mut ctx = self.context.write().await;
        apply_event(&mut ctx, event);
    }

    pub async fn record_push(&self, now: Epoch) {
        let mut ctx = self.context.write().await;
        ctx.meta.last_agent_push_at = Some(now);
        ctx.meta.pushes_today += 1;
    }

    pub async fn save(&self) -> Result<()> {
        let ctx = self.context.read().await.clone();
        write_json_pretty(&self.context_path, &ctx).await
    }

    /// Missing or corrupt patterns are treated as the empty document.
    pub async fn read_patterns(&self) -> Patterns {
        match fs::read_to_string(&self.patterns_path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Patterns::default(),
        }
    }

    pub async fn write_patterns(&self, patterns: &Patterns) -> Result<()> {
        write_json_pretty(&self.patterns_path, patterns).await
    }
}

async fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    fs::write(path, json).await?;
    Ok(())
}

/// Pure state transition, split out from the async store for direct testing.
pub fn apply_event(ctx: &mut DeviceContext, event: &DeviceEvent) {
    if ctx.meta.last_event_at > 0.0 && utc_day(event.fired_at) != utc_day(ctx.meta.last_event_at) {
        ctx.meta.events_today = 0;
        ctx.meta.pushes_today = 0;
    }
    ctx.meta.last_event_at = event.fired_at;
    ctx.meta.events_today += 1;

    match event.source.as_str() {
        "device.battery" => apply_battery(ctx, event),
        "geofence.triggered" => apply_geofence(ctx, event),
        source if source.starts_with("health") => apply_health(ctx, event),
        _ => {}
    }
}

fn apply_battery(ctx: &mut DeviceContext, event: &DeviceEvent) {
    let prior = ctx.device.battery.clone();
    let level = event.data_get("level").or_else(|| prior.as_ref().map(|b| b.level)).unwrap_or(0.0);
    let state = event
        .metadata_get("state")
        .map(str::to_string)
        .or_else(|| prior.as_ref().map(|b| b.state.clone()))
        .unwrap_or_else(|| "unknown".to_string());
    let is_low_power_mode = event
        .data_get("isLowPowerMode")
        .map(|v| v != 0.0)
        .unwrap_or_else(|| prior.as_ref().map(|b| b.is_low_power_mode).unwrap_or(false));
    ctx.device.battery = Some(BatteryStatus { level, state, is_low_power_mode, updated_at: event.fired_at });
}

fn apply_geofence(ctx: &mut DeviceContext, event: &DeviceEvent) {
    let transition = event.metadata_get("transition").unwrap_or("enter").to_string();
    let zone = event.metadata_get("zoneName").map(str::to_string);

    let prior_location = ctx.device.location.clone();
    let latitude = event.data_get("latitude").or_else(|| prior_location.as_ref().map(|l| l.latitude)).unwrap_or(0.0);
    let longitude = event
        .data_get("longitude")
        .or_else(|| prior_location.as_ref().map(|l| l.longitude))
        .unwrap_or(0.0);
    let horizontal_accuracy = event
        .data_get("horizontalAccuracy")
        .or_else(|| prior_location.as_ref().map(|l| l.horizontal_accuracy))
        .unwrap_or(0.0);
    let label = zone.clone().or_else(|| prior_location.as_ref().and_then(|l| l.label.clone()));
    ctx.device.location = Some(LocationStatus { latitude, longitude, horizontal_accuracy, label, updated_at: event.fired_at });

    let from_zone = ctx.activity.current_zone.clone();
    if transition == "enter" {
        ctx.activity.last_transition = Some(ZoneTransition { from: from_zone, to: zone.clone(), at: event.fired_at });
        ctx.activity.current_zone = zone;
        ctx.activity.zone_entered_at = Some(event.fired_at);
        ctx.activity.is_stationary = true;
        ctx.activity.stationary_since = Some(event.fired_at);
    } else {
        ctx.activity.last_transition = Some(ZoneTransition { from: from_zone, to: None, at: event.fired_at });
        ctx.activity.current_zone = None;
        ctx.activity.zone_entered_at = None;
        ctx.activity.is_stationary = false;
        ctx.activity.stationary_since = None;
    }
}

fn apply_health(ctx: &mut DeviceContext, event: &DeviceEvent) {
    let h = &mut ctx.device.health;
    if let Some(v) = event.data_get("stepsToday") {
        h.steps_today = Some(v);
    }
    if let Some(v) = event.data_get("distanceMeters") {
        h.distance_meters = Some(v);
    }
    if let Some(v) = event.data_get("heartRateAvg") {
        h.heart_rate_avg = Some(v);
    }
    if let Some(v) = event.data_get("restingHeartRate") {
        h.resting_heart_rate = Some(v);
    }
    if let Some(v) = event.data_get("hrv") {
        h.hrv = Some(v);
    }
    if let Some(v) = event.data_get("activeEnergyKcal") {
        h.active_energy_kcal = Some(v);
    }
    if let Some(v) = event.data_get("sleepDurationSeconds") {
        h.sleep_duration_seconds = Some(v);
    }
    h.updated_at = Some(event.fired_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event(source: &str, data: &[(&str, f64)], metadata: &[(&str, &str)], fired_at: Epoch) -> DeviceEvent {
        DeviceEvent {
            subscription_id: "sub".into(),
            source: source.into(),
            data: data.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(metadata.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>())
            },
            fired_at,
        }
    }

    #[test]
    fn events_today_increments_unless_day_rolls_over() {
        let mut ctx = DeviceContext::default();
        apply_event(&mut ctx, &event("device.battery", &[("level", 0.5)], &[], 1_700_000_000.0));
        assert_eq!(ctx.meta.events_today, 1);
        apply_event(&mut ctx, &event("device.battery", &[("level", 0.4)], &[], 1_700_000_100.0));
        assert_eq!(ctx.meta.events_today, 2);

        ctx.meta.pushes_today = 3;
        let next_day = 1_700_000_100.0 + 86_400.0;
        apply_event(&mut ctx, &event("device.battery", &[("level", 0.3)], &[], next_day));
        assert_eq!(ctx.meta.events_today, 1);
        assert_eq!(ctx.meta.pushes_today, 0);
    }

    #[test]
    fn geofence_enter_then_exit_clears_zone_and_stationary() {
        let mut ctx = DeviceContext::default();
        apply_event(
            &mut ctx,
            &event("geofence.triggered", &[], &[("transition", "enter"), ("zoneName", "Home")], 1_000.0),
        );
        assert_eq!(ctx.activity.current_zone.as_deref(), Some("Home"));
        assert!(ctx.activity.is_stationary);

        apply_event(
            &mut ctx,
            &event("geofence.triggered", &[], &[("transition", "exit"), ("zoneName", "Home")], 2_000.0),
        );
        assert_eq!(ctx.activity.current_zone, None);
        assert!(!ctx.activity.is_stationary);
        assert_eq!(ctx.activity.stationary_since, None);
    }

    #[test]
    fn health_merge_preserves_absent_fields() {
        let mut ctx = DeviceContext::default();
        apply_event(&mut ctx, &event("health.summary", &[("stepsToday", 1000.0)], &[], 1.0));
        apply_event(&mut ctx, &event("health.summary", &[("restingHeartRate", 52.0)], &[], 2.0));
        assert_eq!(ctx.device.health.steps_today, Some(1000.0));
        assert_eq!(ctx.device.health.resting_heart_rate, Some(52.0));
    }

    #[tokio::test]
    async fn load_on_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
        store.load().await;
        assert_eq!(store.get().await, DeviceContext::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
        store.update_from_event(&event("device.battery", &[("level", 0.42)], &[], 10.0)).await;
        store.save().await.unwrap();

        let reloaded = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
        reloaded.load().await;
        assert_eq!(reloaded.get().await.device.battery.unwrap().level, 0.42);
    }

    #[tokio::test]
    async fn patterns_lock_serializes_concurrent_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));

        let writers = (0..20).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_patterns().await;
                let mut patterns = store.read_patterns().await;
                patterns.trigger_cooldowns.insert(format!("trigger-{i}"), i as f64);
                store.write_patterns(&patterns).await.unwrap();
            })
        });
        for writer in writers {
            writer.await.unwrap();
        }

        // If two writers had interleaved their read-modify-write span, one of
        // these 20 inserts would have been clobbered by a write that started
        // its read before the other's write landed.
        let patterns = store.read_patterns().await;
        assert_eq!(patterns.trigger_cooldowns.len(), 20);
    }
}
