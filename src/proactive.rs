//! Periodic scanner over a fixed, ordered trigger table. Each trigger
//! combines the live context snapshot with the latest computed patterns and,
//! on firing, writes its cooldown to disk before attempting delivery.

use crate::context::ContextStore;
use crate::delivery::Delivery;
use crate::model::{DeviceContext, Epoch, Patterns, Priority, ProactiveInsight, Trend};
use crate::time_util::{local_day_of_week, local_hour, local_hour_fraction, now_epoch};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const HOURLY_SCAN: Duration = Duration::from_secs(3600);
const STARTUP_DELAY: Duration = Duration::from_secs(5 * 60);
const DEFAULT_DRAIN_PER_HOUR: f64 = 0.04;

fn cooldown_for(trigger_id: &str) -> f64 {
    match trigger_id {
        "low-battery-away" => 4.0 * 3600.0,
        "unusual-inactivity" => 6.0 * 3600.0,
        "sleep-deficit" => 24.0 * 3600.0,
        "routine-deviation" => 4.0 * 3600.0,
        "health-weekly-digest" => 7.0 * 86_400.0,
        _ => 3600.0,
    }
}

type Predicate = fn(&DeviceContext, &Patterns, Epoch) -> Option<ProactiveInsight>;

const TRIGGERS: &[(&str, Predicate)] = &[
    ("low-battery-away", low_battery_away),
    ("unusual-inactivity", unusual_inactivity),
    ("sleep-deficit", sleep_deficit),
    ("routine-deviation", routine_deviation),
    ("health-weekly-digest", health_weekly_digest),
];

pub struct ProactiveEngine {
    context: ContextStore,
    delivery: Arc<dyn Delivery>,
    delivery_channel: String,
}

impl ProactiveEngine {
    pub fn new(context: ContextStore, delivery: Arc<dyn Delivery>, delivery_channel: impl Into<String>) -> Self {
        Self { context, delivery, delivery_channel: delivery_channel.into() }
    }

    pub async fn run_once(&self, now: Epoch) {
        let snapshot = self.context.get().await;
        let _guard = self.context.lock_patterns().await;
        let mut patterns = self.context.read_patterns().await;

        for (id, predicate) in TRIGGERS {
            let last_fired = patterns.trigger_cooldowns.get(*id).copied();
            if let Some(last) = last_fired {
                if now - last < cooldown_for(id) {
                    continue;
                }
            }

            let Some(insight) = predicate(&snapshot, &patterns, now) else { continue };

            patterns.trigger_cooldowns.insert((*id).to_string(), now);
            if let Err(e) = self.context.write_patterns(&patterns).await {
                error!("proactive engine failed to persist trigger cooldown for {id}: {e}");
            }

            debug!("proactive trigger {id} fired: {}", insight.message);
            if let Err(e) = self.delivery.deliver(&self.delivery_channel, &insight.message).await {
                error!("proactive delivery failed for {id}: {e}");
            }
        }
    }

    /// Runs on an hourly cadence, plus one extra run 5 minutes after startup.
    /// Returns the hourly loop's handle; the startup one-shot is detached
    /// since it completes on its own well before any reasonable shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let startup_engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_DELAY).await;
            startup_engine.run_once(now_epoch()).await;
        });

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HOURLY_SCAN);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.run_once(now_epoch()).await;
            }
        })
    }
}

fn low_battery_away(context: &DeviceContext, patterns: &Patterns, _now: Epoch) -> Option<ProactiveInsight> {
    let battery = context.device.battery.as_ref()?;
    if battery.level >= 0.3 {
        return None;
    }
    if context.activity.current_zone.as_deref() == Some("Home") {
        return None;
    }
    let drain = patterns.battery_patterns.avg_drain_per_hour.unwrap_or(DEFAULT_DRAIN_PER_HOUR);
    let hours_remaining = (battery.level / drain).round();
    let priority = if battery.level < 0.15 { Priority::High } else { Priority::Normal };
    Some(ProactiveInsight {
        id: "low-battery-away".to_string(),
        message: format!(
            "\u{1F50B} Battery at {:.0}% away from home, roughly {hours_remaining:.0}h remaining at current drain",
            battery.level * 100.0
        ),
        priority,
    })
}

fn unusual_inactivity(context: &DeviceContext, patterns: &Patterns, now: Epoch) -> Option<ProactiveInsight> {
    let hour = local_hour(now);
    if hour < 12 {
        return None;
    }
    let steps = context.device.health.steps_today?;
    let avg = patterns.health_trends.steps.avg7d?;
    let expected_by_now = avg * (hour as f64 / 24.0);
    if steps >= 0.5 * expected_by_now {
        return None;
    }
    Some(ProactiveInsight {
        id: "unusual-inactivity".to_string(),
        message: format!("\u{1F6B6} Only {steps:.0} steps today, well under the usual pace by this hour"),
        priority: Priority::Normal,
    })
}

fn sleep_deficit(context: &DeviceContext, patterns: &Patterns, now: Epoch) -> Option<ProactiveInsight> {
    let hour = local_hour(now);
    if !(7..=10).contains(&hour) {
        return None;
    }
    let actual = context.device.health.sleep_duration_seconds?;
    let avg = patterns.health_trends.sleep.avg7d?;
    let deficit = avg - actual;
    if deficit < 3600.0 {
        return None;
    }
    Some(ProactiveInsight {
        id: "sleep-deficit".to_string(),
        message: format!("\u{1F634} Slept {:.1}h, about {:.1}h under the recent average", actual / 3600.0, deficit / 3600.0),
        priority: Priority::Normal,
    })
}

fn routine_deviation(context: &DeviceContext, patterns: &Patterns, now: Epoch) -> Option<ProactiveInsight> {
    let dow = local_day_of_week(now);
    if !(1..=5).contains(&dow) {
        return None;
    }
    let current_zone = context.activity.current_zone.as_deref()?;
    let hour = local_hour_fraction(now);

    for routine in &patterns.location_routines.weekday {
        if routine.zone != current_zone {
            continue;
        }
        let Some(typical_leave) = &routine.typical_leave else { continue };
        let typical_hour = parse_hh_mm(typical_leave)?;
        if hour > typical_hour + 1.5 {
            return Some(ProactiveInsight {
                id: "routine-deviation".to_string(),
                message: format!("\u{1F4CD} Still at {current_zone} well past the usual {typical_leave} departure"),
                priority: Priority::Normal,
            });
        }
    }
    None
}

fn health_weekly_digest(_context: &DeviceContext, patterns: &Patterns, now: Epoch) -> Option<ProactiveInsight> {
    let dow = local_day_of_week(now);
    let hour = local_hour(now);
    if dow != 0 || !(9..=11).contains(&hour) {
        return None;
    }
    let stats = &patterns.event_stats;
    let trends = &patterns.health_trends;
    Some(ProactiveInsight {
        id: "health-weekly-digest".to_string(),
        message: format!(
            "\u{1F4CA} Weekly digest — steps {}, sleep {}, resting HR {} · {:.1} events/day, {:.0}% drop rate",
            describe_trend(trends.steps.trend),
            describe_trend(trends.sleep.trend),
            describe_trend(trends.resting_heart_rate.trend),
            stats.events_per_day,
            stats.drop_rate * 100.0
        ),
        priority: Priority::Normal,
    })
}

fn describe_trend(trend: Trend) -> &'static str {
    match trend {
        Trend::Improving => "improving",
        Trend::Stable => "stable",
        Trend::Declining => "declining",
        Trend::Absent => "no data",
    }
}

fn parse_hh_mm(value: &str) -> Option<f64> {
    let (h, m) = value.split_once(':')?;
    let hours: f64 = h.parse().ok()?;
    let minutes: f64 = m.parse().ok()?;
    Some(hours + minutes / 60.0)
}
