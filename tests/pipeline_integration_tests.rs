//! End-to-end coverage across the pipeline, pattern engine, and proactive
//! engine sharing one on-disk state directory, exercising the seams that
//! per-module unit tests can't: file-backed patterns surviving a process
//! restart, and a proactive trigger firing off patterns the pattern engine
//! itself produced.

use async_trait::async_trait;
use betterclaw_core::context::ContextStore;
use betterclaw_core::delivery::Delivery;
use betterclaw_core::event_log::EventLog;
use betterclaw_core::judgment::{JudgmentLayer, NullLlm};
use betterclaw_core::model::{Decision, DeviceEvent};
use betterclaw_core::patterns::PatternEngine;
use betterclaw_core::pipeline::Pipeline;
use betterclaw_core::proactive::ProactiveEngine;
use betterclaw_core::rules::RulesEngine;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

struct CountingDelivery(Arc<AtomicUsize>);

#[async_trait]
impl Delivery for CountingDelivery {
    async fn deliver(&self, _channel: &str, _message: &str) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn battery_event(level: f64, fired_at: f64) -> DeviceEvent {
    DeviceEvent {
        subscription_id: "default.battery-low".into(),
        source: "device.battery".into(),
        data: HashMap::from([("level".to_string(), level)]),
        metadata: None,
        fired_at,
    }
}

#[tokio::test]
async fn pattern_compute_then_proactive_trigger_share_persisted_state() {
    let dir = tempdir().unwrap();
    let context = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
    let event_log = EventLog::new(dir.path().join("events.jsonl"));
    let delivery_count = Arc::new(AtomicUsize::new(0));
    let delivery: Arc<dyn Delivery> = Arc::new(CountingDelivery(delivery_count.clone()));

    let pipeline = Pipeline::new(
        context.clone(),
        RulesEngine::new(10),
        JudgmentLayer::new("openai/gpt-4o-mini".into(), 10),
        event_log.clone(),
        delivery.clone(),
        Arc::new(NullLlm),
        "telegram",
    );

    // Drive the battery level down across several distinct readings so each
    // clears the rules engine's "unchanged" suppression and gets logged.
    let mut fired_at = 0.0;
    for level in [0.25, 0.20, 0.12] {
        pipeline.process_event(battery_event(level, fired_at)).await;
        fired_at += 4000.0; // past the battery-low cooldown (3600s)
    }

    let logged = event_log.read_all().await.unwrap();
    assert_eq!(logged.len(), 3);
    assert!(logged.iter().all(|e| e.decision == Decision::Push));

    // The pattern engine should see those as away-from-home low-battery
    // events and compute a non-zero frequency.
    let pattern_engine = PatternEngine::new(context.clone(), event_log.clone(), 30);
    pattern_engine.run_once(fired_at + 86_400.0).await;
    let patterns = context.read_patterns().await;
    assert!(patterns.battery_patterns.low_battery_frequency.unwrap() > 0.0);

    // With the context left at the last (lowest, away-from-home) battery
    // reading, the proactive engine's low-battery-away trigger should fire
    // and deliver exactly once, recording its own cooldown in patterns.json.
    let proactive_engine = ProactiveEngine::new(context.clone(), delivery, "telegram");
    proactive_engine.run_once(fired_at + 86_400.0).await;
    assert_eq!(delivery_count.load(Ordering::SeqCst), 1);

    let patterns_after = context.read_patterns().await;
    assert!(patterns_after.trigger_cooldowns.contains_key("low-battery-away"));

    // Re-opening a fresh ContextStore against the same files proves the
    // pattern computation and trigger cooldown both survived to disk.
    let reopened = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
    let reloaded_patterns = reopened.read_patterns().await;
    assert_eq!(reloaded_patterns.trigger_cooldowns, patterns_after.trigger_cooldowns);
}

#[tokio::test]
async fn rotate_runs_as_part_of_pattern_compute_without_touching_recent_entries() {
    let dir = tempdir().unwrap();
    let context = ContextStore::new(dir.path().join("context.json"), dir.path().join("patterns.json"));
    let event_log = EventLog::new(dir.path().join("events.jsonl"));
    let pipeline = Pipeline::new(
        context.clone(),
        RulesEngine::new(1000),
        JudgmentLayer::new("openai/gpt-4o-mini".into(), 1000),
        event_log.clone(),
        Arc::new(CountingDelivery(Arc::new(AtomicUsize::new(0)))),
        Arc::new(NullLlm),
        "telegram",
    );

    for i in 0..20 {
        pipeline
            .process_event(DeviceEvent {
                subscription_id: format!("custom.sub-{i}"),
                source: "custom.source".into(),
                data: HashMap::new(),
                metadata: None,
                fired_at: i as f64,
            })
            .await;
    }

    let pattern_engine = PatternEngine::new(context.clone(), event_log.clone(), 30);
    pattern_engine.run_once(1000.0).await;

    // Well under the 10,000-entry rotation threshold, so nothing is dropped.
    assert_eq!(event_log.read_all().await.unwrap().len(), 20);
}
