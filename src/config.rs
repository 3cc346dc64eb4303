//! Layered configuration: built-in defaults, an optional `betterclaw.toml`,
//! then environment variables — same precedence order as the `config` crate
//! examples this repo's dependency on it was chosen for.

use crate::error::{BetterClawError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub llm_model: String,
    pub push_budget_per_day: u32,
    pub pattern_window_days: u32,
    pub proactive_enabled: bool,
    pub state_dir: PathBuf,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_model: "openai/gpt-4o-mini".to_string(),
            push_budget_per_day: 10,
            pattern_window_days: 14,
            proactive_enabled: true,
            state_dir: default_state_dir(),
            log_level: "info".to_string(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("betterclaw")
}

impl AppConfig {
    /// Loads configuration from defaults, an optional TOML file, then
    /// environment variables prefixed `BETTERCLAW_`. `config_path` overrides
    /// the default `betterclaw.toml` lookup; a missing file is not an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("llmModel", "openai/gpt-4o-mini")
            .map_err(|e| BetterClawError::Config(e.to_string()))?
            .set_default("pushBudgetPerDay", 10)
            .map_err(|e| BetterClawError::Config(e.to_string()))?
            .set_default("patternWindowDays", 14)
            .map_err(|e| BetterClawError::Config(e.to_string()))?
            .set_default("proactiveEnabled", true)
            .map_err(|e| BetterClawError::Config(e.to_string()))?
            .set_default("stateDir", default_state_dir().to_string_lossy().to_string())
            .map_err(|e| BetterClawError::Config(e.to_string()))?
            .set_default("logLevel", "info")
            .map_err(|e| BetterClawError::Config(e.to_string()))?;

        let path = config_path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("betterclaw.toml"));
        builder = builder.add_source(config::File::from(path).required(false));
        // "__" (not "_") is the nesting separator: every field name here is
        // itself multi-word snake_case (push_budget_per_day, ...), so a
        // single-underscore separator would parse BETTERCLAW_PUSH_BUDGET_PER_DAY
        // as the nested path push.budget.per.day instead of the flat key.
        builder = builder.add_source(
            config::Environment::with_prefix("BETTERCLAW")
                .try_parsing(true)
                .separator("__"),
        );

        let raw = builder.build().map_err(|e| BetterClawError::Config(e.to_string()))?;
        let parsed: AppConfig = raw.try_deserialize().map_err(|e| BetterClawError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.push_budget_per_day == 0 {
            return Err(BetterClawError::Config("pushBudgetPerDay must be positive".into()));
        }
        if self.pattern_window_days == 0 {
            return Err(BetterClawError::Config("patternWindowDays must be positive".into()));
        }
        Ok(())
    }

    pub fn context_path(&self) -> PathBuf {
        self.state_dir.join("context.json")
    }

    pub fn patterns_path(&self) -> PathBuf {
        self.state_dir.join("patterns.json")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.push_budget_per_day, 10);
        assert_eq!(cfg.pattern_window_days, 14);
        assert!(cfg.proactive_enabled);
    }

    #[test]
    fn validate_rejects_zero_budget() {
        let mut cfg = AppConfig::default();
        cfg.push_budget_per_day = 0;
        assert!(cfg.validate().is_err());
    }

    /// Env vars are process-global and this is the only test in the crate
    /// that sets `BETTERCLAW_*`, so it's safe without cross-test locking.
    #[test]
    fn env_vars_override_defaults_and_file() {
        std::env::set_var("BETTERCLAW_LLM_MODEL", "anthropic/claude-haiku");
        std::env::set_var("BETTERCLAW_PUSH_BUDGET_PER_DAY", "25");
        std::env::set_var("BETTERCLAW_PATTERN_WINDOW_DAYS", "7");
        std::env::set_var("BETTERCLAW_PROACTIVE_ENABLED", "false");

        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("nonexistent.toml")));

        std::env::remove_var("BETTERCLAW_LLM_MODEL");
        std::env::remove_var("BETTERCLAW_PUSH_BUDGET_PER_DAY");
        std::env::remove_var("BETTERCLAW_PATTERN_WINDOW_DAYS");
        std::env::remove_var("BETTERCLAW_PROACTIVE_ENABLED");

        let cfg = result.unwrap();
        assert_eq!(cfg.llm_model, "anthropic/claude-haiku");
        assert_eq!(cfg.push_budget_per_day, 25);
        assert_eq!(cfg.pattern_window_days, 7);
        assert!(!cfg.proactive_enabled);
    }
}
