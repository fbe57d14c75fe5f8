use std::time::Duration;

use crate::config::AgentConfig;

/// Per-task limits, fixed when the task starts.
#[derive(Debug, Clone)]
pub struct LoopLimits {
    pub max_steps: u32,
    pub perception_failure_threshold: u32,
    pub planner_failure_threshold: u32,
    pub denial_threshold: u32,
    /// 0 disables repeated-action detection.
    pub max_repeated_actions: u32,
    pub perception_timeout: Duration,
    pub planner_timeout: Duration,
    pub actuator_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl LoopLimits {
    /// Thresholds below one would fail a task before its first attempt, so
    /// they are raised to one.
    pub fn from_config(cfg: &AgentConfig, max_steps: u32) -> Self {
        Self {
            max_steps: max_steps.max(1),
            perception_failure_threshold: cfg.perception_failure_threshold.max(1),
            planner_failure_threshold: cfg.planner_failure_threshold.max(1),
            denial_threshold: cfg.denial_threshold.max(1),
            max_repeated_actions: cfg.max_repeated_actions,
            perception_timeout: Duration::from_millis(cfg.perception_timeout_ms),
            planner_timeout: Duration::from_millis(cfg.planner_timeout_ms),
            actuator_timeout: Duration::from_millis(cfg.actuator_timeout_ms),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            backoff_max: Duration::from_millis(cfg.backoff_max_ms),
        }
    }

    /// Delay before the retry following the `failures`-th consecutive
    /// failure: base * 2^(failures-1), capped at `backoff_max`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        let cfg = AgentConfig::default();
        Self::from_config(&cfg, cfg.default_step_budget)
    }
}

/// Counters threaded through the transition function. All "consecutive"
/// counters reset on the corresponding success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Executed steps (denials excluded).
    pub steps: u32,
    pub perception_failures: u32,
    pub planner_failures: u32,
    pub denials: u32,
    /// Consecutive proposals with the same fingerprint, including the first.
    pub repeats: u32,
    pub last_fingerprint: Option<u64>,
}

impl Counters {
    pub(crate) fn note_proposal(mut self, fingerprint: u64) -> Self {
        if self.last_fingerprint == Some(fingerprint) {
            self.repeats += 1;
        } else {
            self.repeats = 1;
            self.last_fingerprint = Some(fingerprint);
        }
        self
    }
}
