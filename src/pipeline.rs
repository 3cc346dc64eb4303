//! Orchestrates context update → rule filtering → (conditional) judgment →
//! logging → delivery for a single event, and serializes concurrent events
//! through a single-consumer queue so that sequence is indivisible per
//! SPEC_FULL.md §5.

use crate::context::ContextStore;
use crate::delivery::Delivery;
use crate::event_log::EventLog;
use crate::judgment::{JudgmentLayer, Llm};
use crate::model::{Decision, DeviceContext, DeviceEvent, EventLogEntry, RuleOutcome};
use crate::rules::RulesEngine;
use crate::time_util::now_epoch;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

pub struct Pipeline {
    pub(crate) context: ContextStore,
    pub(crate) rules: RulesEngine,
    pub(crate) judgment: JudgmentLayer,
    pub(crate) event_log: EventLog,
    pub(crate) delivery: Arc<dyn Delivery>,
    pub(crate) llm: Arc<dyn Llm>,
    pub(crate) delivery_channel: String,
}

impl Pipeline {
    pub fn new(
        context: ContextStore,
        rules: RulesEngine,
        judgment: JudgmentLayer,
        event_log: EventLog,
        delivery: Arc<dyn Delivery>,
        llm: Arc<dyn Llm>,
        delivery_channel: impl Into<String>,
    ) -> Self {
        Self { context, rules, judgment, event_log, delivery, llm, delivery_channel: delivery_channel.into() }
    }

    pub async fn process_event(&self, event: DeviceEvent) {
        self.context.update_from_event(&event).await;
        let snapshot = self.context.get().await;

        let (decision, reason) = self.decide(&event, &snapshot).await;
        let now = now_epoch();

        let entry = EventLogEntry { event: event.clone(), decision, reason: reason.clone(), timestamp: now };
        if let Err(e) = self.event_log.append(&entry).await {
            error!("failed to append event log entry: {e}");
        }

        if decision == Decision::Push {
            self.rules.record_fired(&event.subscription_id, event.fired_at);
            self.context.record_push(now).await;
            let message = build_message(&event, &snapshot);
            if let Err(e) = self.delivery.deliver(&self.delivery_channel, &message).await {
                error!("agent delivery failed: {e}");
            }
        }

        if let Err(e) = self.context.save().await {
            error!("failed to persist context: {e}");
        }
    }

    async fn decide(&self, event: &DeviceEvent, snapshot: &DeviceContext) -> (Decision, String) {
        match self.rules.evaluate(event, snapshot) {
            RuleOutcome::Push(reason) => (Decision::Push, reason),
            RuleOutcome::Drop(reason) => (Decision::Drop, reason),
            RuleOutcome::Defer(reason) => (Decision::Defer, reason),
            RuleOutcome::Ambiguous => {
                let judged = self.judgment.evaluate(event, snapshot, self.llm.as_ref()).await;
                let reason = format!("llm: {}", judged.reason);
                if judged.push {
                    (Decision::Push, reason)
                } else {
                    (Decision::Drop, reason)
                }
            }
        }
    }
}

fn build_message(event: &DeviceEvent, context: &DeviceContext) -> String {
    let is_debug = event.data_get("_debugFired") == Some(1.0);
    let outer_prefix = if is_debug { "\u{1F41B} [debug]" } else { "\u{1F4F1}" };
    format!("{outer_prefix} {}\n{}", source_body(event, context), context_summary(context))
}

fn source_body(event: &DeviceEvent, context: &DeviceContext) -> String {
    match event.source.as_str() {
        "device.battery" => {
            let level = context.device.battery.as_ref().map(|b| b.level).unwrap_or(0.0);
            format!("\u{1F50B} Battery at {:.0}%", level * 100.0)
        }
        "geofence.triggered" => match &context.activity.current_zone {
            Some(zone) => format!("\u{1F4CD} Arrived at {zone}"),
            None => "\u{1F4CD} Left the last known zone".to_string(),
        },
        source if source.starts_with("health") => {
            let steps = context.device.health.steps_today.unwrap_or(0.0);
            format!("\u{2764}\u{FE0F} {steps:.0} steps today")
        }
        _ => format!("\u{2139}\u{FE0F} {}", event.subscription_id),
    }
}

fn context_summary(context: &DeviceContext) -> String {
    format!("events today: {}, pushes today: {}", context.meta.events_today, context.meta.pushes_today)
}

/// Handle to submit events onto the pipeline's single-consumer lane.
#[derive(Clone)]
pub struct PipelineHandle {
    sender: mpsc::Sender<DeviceEvent>,
}

impl PipelineHandle {
    pub async fn submit(&self, event: DeviceEvent) {
        let subscription_id = event.subscription_id.clone();
        if self.sender.send(event).await.is_err() {
            error!("pipeline consumer has shut down; dropping event {subscription_id}");
        }
    }
}

/// Spawns the single consumer task. Performs startup init (context load +
/// cooldown restore from the last 24h of the log) before draining the queue,
/// so any event submitted before init finishes simply waits in the channel.
pub fn spawn_pipeline(pipeline: Pipeline, buffer: usize) -> (PipelineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let handle = tokio::spawn(async move {
        pipeline.context.load().await;
        match pipeline.event_log.read_since(now_epoch() - 86_400.0).await {
            Ok(entries) => {
                let pushes = entries
                    .into_iter()
                    .filter(|e| e.decision == Decision::Push)
                    .map(|e| (e.event.subscription_id.clone(), e.event.fired_at));
                pipeline.rules.restore_cooldowns(pushes);
            }
            Err(e) => error!("failed to restore cooldowns from event log: {e}"),
        }

        while let Some(event) = rx.recv().await {
            pipeline.process_event(event).await;
        }
    });
    (PipelineHandle { sender: tx }, handle)
}
