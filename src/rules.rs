//! Synchronous classifier: `event × context → {push, drop, defer, ambiguous}`.
//!
//! Holds two pieces of process-lifetime state: the dedup map (`lastFired`,
//! recoverable from the event log via [`RulesEngine::restore_cooldowns`]) and
//! a last-seen battery level used by the battery-low "unchanged" check. The
//! latter is tracked independently of the context snapshot because, by the
//! time `evaluate` runs, the pipeline has already merged the incoming event
//! into context (see SPEC_FULL.md §4.E) — so the context's battery level is
//! already the *current* reading, not the prior one.

use crate::model::{DeviceContext, DeviceEvent, Epoch, RuleOutcome};
use crate::time_util::local_hour;
use std::collections::HashMap;
use std::sync::Mutex;

fn default_cooldown(subscription_id: &str, source: &str) -> f64 {
    match subscription_id {
        "default.battery-low" => 3600.0,
        "default.battery-critical" => 1800.0,
        "default.daily-health" => 82_800.0,
        _ if source == "geofence.triggered" => 300.0,
        _ => 1800.0,
    }
}

#[derive(Debug)]
pub struct RulesEngine {
    last_fired: Mutex<HashMap<String, Epoch>>,
    last_battery_level: Mutex<Option<f64>>,
    push_budget: u32,
}

impl RulesEngine {
    pub fn new(push_budget: u32) -> Self {
        Self {
            last_fired: Mutex::new(HashMap::new()),
            last_battery_level: Mutex::new(None),
            push_budget,
        }
    }

    pub fn evaluate(&self, event: &DeviceEvent, context: &DeviceContext) -> RuleOutcome {
        if event.data_get("_debugFired") == Some(1.0) {
            return RuleOutcome::Push("debug event — always push".to_string());
        }

        let cooldown = default_cooldown(&event.subscription_id, &event.source);
        if let Some(last) = self.last_fired.lock().unwrap().get(&event.subscription_id).copied() {
            let elapsed = event.fired_at - last;
            if elapsed < cooldown {
                return RuleOutcome::Drop(format!(
                    "dedup: {elapsed:.0}s since last fire for {}, cooldown is {cooldown:.0}s",
                    event.subscription_id
                ));
            }
        }

        if event.subscription_id == "default.battery-critical" {
            return RuleOutcome::Push("always-push: battery critical".to_string());
        }
        if event.source == "geofence.triggered" {
            return RuleOutcome::Push("always-push: geofence transition".to_string());
        }
        if event.subscription_id == "default.battery-low" {
            return self.evaluate_battery_low(event);
        }
        if event.subscription_id == "default.daily-health" {
            let hour = local_hour(event.fired_at);
            return if (6..=10).contains(&hour) {
                RuleOutcome::Push("within morning window".to_string())
            } else {
                RuleOutcome::Defer("outside morning window".to_string())
            };
        }

        if context.meta.pushes_today >= self.push_budget {
            return RuleOutcome::Drop("push budget exhausted".to_string());
        }

        RuleOutcome::Ambiguous
    }

    fn evaluate_battery_low(&self, event: &DeviceEvent) -> RuleOutcome {
        let current = event.data_get("level");
        let mut last_level = self.last_battery_level.lock().unwrap();
        let prior = *last_level;
        if let Some(c) = current {
            *last_level = Some(c);
        }
        if let (Some(c), Some(p)) = (current, prior) {
            if (c - p).abs() < 0.02 {
                return RuleOutcome::Drop("level unchanged".to_string());
            }
        }
        RuleOutcome::Push("battery-low level changed".to_string())
    }

    /// Must only be called when the pipeline actually pushes.
    pub fn record_fired(&self, subscription_id: &str, fired_at: Epoch) {
        self.last_fired.lock().unwrap().insert(subscription_id.to_string(), fired_at);
    }

    /// Rebuilds the dedup map from past push records, keyed by the max
    /// `firedAt` per subscription.
    pub fn restore_cooldowns(&self, entries: impl IntoIterator<Item = (String, Epoch)>) {
        let mut last_fired = self.last_fired.lock().unwrap();
        for (subscription_id, fired_at) in entries {
            let slot = last_fired.entry(subscription_id).or_insert(fired_at);
            if fired_at > *slot {
                *slot = fired_at;
            }
        }
    }
}
