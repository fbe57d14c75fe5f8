use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

/// Loop thresholds and collaborator timeouts. Every field has a default so a
/// partial `[agent]` table is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_step_budget")]
    pub default_step_budget: u32,
    #[serde(default = "default_threshold")]
    pub perception_failure_threshold: u32,
    #[serde(default = "default_threshold")]
    pub planner_failure_threshold: u32,
    #[serde(default = "default_threshold")]
    pub denial_threshold: u32,
    /// Identical consecutive proposals tolerated before the task is failed
    /// with `action-loop`. 0 disables the check.
    #[serde(default)]
    pub max_repeated_actions: u32,
    #[serde(default = "default_perception_timeout")]
    pub perception_timeout_ms: u64,
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_ms: u64,
    #[serde(default = "default_actuator_timeout")]
    pub actuator_timeout_ms: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_step_budget: default_step_budget(),
            perception_failure_threshold: default_threshold(),
            planner_failure_threshold: default_threshold(),
            denial_threshold: default_threshold(),
            max_repeated_actions: 0,
            perception_timeout_ms: default_perception_timeout(),
            planner_timeout_ms: default_planner_timeout(),
            actuator_timeout_ms: default_actuator_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_step_budget() -> u32 {
    15
}

fn default_threshold() -> u32 {
    3
}

fn default_perception_timeout() -> u64 {
    10_000
}

fn default_planner_timeout() -> u64 {
    60_000
}

fn default_actuator_timeout() -> u64 {
    15_000
}

fn default_backoff_base() -> u64 {
    250
}

fn default_backoff_max() -> u64 {
    4_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Write every step record to a JSONL journal per task.
    #[serde(default = "default_true")]
    pub journal: bool,
    /// Journal directory. Falls back to the platform data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            journal: true,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Falls back to env var DESKPILOT_PLANNER_API_KEY, which takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Number of most recent step records rendered into the planner prompt.
    #[serde(default = "default_context_steps")]
    pub context_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: String::new(),
            temperature: default_temperature(),
            api_key: None,
            context_steps: default_context_steps(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:11434/v1/chat/completions".into()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_context_steps() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        step_budget = config.agent.default_step_budget,
        model = %config.planner.model,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> PilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.default_step_budget, 15);
        assert_eq!(cfg.agent.perception_failure_threshold, 3);
        assert_eq!(cfg.agent.denial_threshold, 3);
        assert_eq!(cfg.agent.max_repeated_actions, 0);
        assert!(cfg.history.journal);
        assert_eq!(cfg.planner.context_steps, 5);
    }

    #[test]
    fn partial_agent_table_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [agent]
            denial_threshold = 5
            planner_timeout_ms = 1500

            [planner]
            model = "qwen2.5-vl"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.denial_threshold, 5);
        assert_eq!(cfg.agent.planner_timeout_ms, 1500);
        assert_eq!(cfg.agent.planner_failure_threshold, 3);
        assert_eq!(cfg.planner.model, "qwen2.5-vl");
        assert!((cfg.planner.temperature - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn load_from_file() {
        let path =
            std::env::temp_dir().join(format!("deskpilot_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[history]\njournal = false\n").unwrap();
        let cfg = load_config_from(&path).unwrap();
        assert!(!cfg.history.journal);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_file_is_a_toml_error() {
        let path =
            std::env::temp_dir().join(format!("deskpilot_bad_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[agent\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, PilotError::TomlDe(_)));
        let _ = std::fs::remove_file(&path);
    }
}
