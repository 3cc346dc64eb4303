//! Async LLM call that resolves an `ambiguous` rule-engine decision into a
//! `push`/`drop`, with a hard timeout and a fail-open policy: any failure in
//! this layer resolves to `push` so the pipeline never silently drops an
//! event solely because triage broke.

use crate::model::{DeviceContext, DeviceEvent};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// External LLM invocation, out of scope for this crate beyond this seam.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Always fails, exercising the fail-open path when no real LLM is wired in.
pub struct NullLlm;

#[async_trait]
impl Llm for NullLlm {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no LLM backend configured"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgmentResult {
    pub push: bool,
    pub reason: String,
}

pub struct JudgmentLayer {
    model: String,
    push_budget: u32,
    timeout: Duration,
}

impl JudgmentLayer {
    pub fn new(model: String, push_budget: u32) -> Self {
        Self { model, push_budget, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(model: String, push_budget: u32, timeout: Duration) -> Self {
        Self { model, push_budget, timeout }
    }

    /// Sanitizes `device.location` down to `{label, updatedAt}` — raw
    /// latitude/longitude must never reach the model.
    pub fn build_prompt(&self, event: &DeviceEvent, context: &DeviceContext) -> String {
        let sanitized_location = context.device.location.as_ref().map(|l| json!({ "label": l.label, "updatedAt": l.updated_at }));
        let sanitized_context = json!({
            "device": {
                "battery": context.device.battery,
                "location": sanitized_location,
                "health": context.device.health,
            },
            "activity": context.activity,
            "meta": context.meta,
        });
        format!(
            "You triage device events for an AI agent session. Decide whether this event is worth pushing now.\n\n\
             Context:\n{}\n\n\
             Event:\n{}\n\n\
             pushesToday: {}\npushBudgetPerDay: {}\nnow: {}\n\n\
             Respond with exactly one JSON object: {{\"push\": bool, \"reason\": string}}",
            serde_json::to_string_pretty(&sanitized_context).unwrap_or_default(),
            serde_json::to_string_pretty(event).unwrap_or_default(),
            context.meta.pushes_today,
            self.push_budget,
            Utc::now().to_rfc3339(),
        )
    }

    pub async fn evaluate(&self, event: &DeviceEvent, context: &DeviceContext, llm: &dyn Llm) -> JudgmentResult {
        if self.model.trim().is_empty() || !self.model.contains('/') {
            warn!("llm model misconfigured ({:?}), failing open", self.model);
            return JudgmentResult { push: true, reason: "model misconfigured, fail open".to_string() };
        }

        let prompt = self.build_prompt(event, context);
        let raw = match tokio::time::timeout(self.timeout, llm.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("llm invocation failed, failing open: {e}");
                return JudgmentResult { push: true, reason: format!("llm error ({e}), fail open") };
            }
            Err(_) => {
                warn!("llm invocation timed out after {:?}, failing open", self.timeout);
                return JudgmentResult { push: true, reason: "llm timeout, fail open".to_string() };
            }
        };

        let trimmed = strip_code_fence(&raw);
        if trimmed.is_empty() {
            warn!("llm returned empty output, failing open");
            return JudgmentResult { push: true, reason: "empty llm output, fail open".to_string() };
        }

        match serde_json::from_str::<JudgmentResult>(trimmed) {
            Ok(result) => result,
            Err(e) => {
                warn!("llm output failed to parse, failing open: {e}");
                JudgmentResult { push: true, reason: format!("unparseable llm output ({e}), fail open") }
            }
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            let rest = rest.trim_start_matches('\n');
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}
