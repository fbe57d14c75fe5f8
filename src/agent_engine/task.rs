use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::safety::PermissionSet;
use crate::perception::types::ObservationRef;

/// Externally visible lifecycle phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Created,
    Perceiving,
    Planning,
    Gating,
    Acting,
    Recording,
    Completed,
    Failed,
    Cancelled,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPhase::Created => "created",
            TaskPhase::Perceiving => "perceiving",
            TaskPhase::Planning => "planning",
            TaskPhase::Gating => "gating",
            TaskPhase::Acting => "acting",
            TaskPhase::Recording => "recording",
            TaskPhase::Completed => "completed",
            TaskPhase::Failed => "failed",
            TaskPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Reason code carried by a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    PerceptionUnavailable,
    PlannerUnavailable,
    PlannerBlocked,
    PermissionExhausted,
    StepBudgetExceeded,
    ActionLoop,
    /// The runner itself died (panic); should not happen.
    Internal,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            FailureReason::PerceptionUnavailable => "perception-unavailable",
            FailureReason::PlannerUnavailable => "planner-unavailable",
            FailureReason::PlannerBlocked => "planner-blocked",
            FailureReason::PermissionExhausted => "permission-exhausted",
            FailureReason::StepBudgetExceeded => "step-budget-exceeded",
            FailureReason::ActionLoop => "action-loop",
            FailureReason::Internal => "internal",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { summary: String },
    Failed { reason: FailureReason, detail: String },
    /// `during` is the phase that was active when cancellation was observed.
    Cancelled { during: TaskPhase },
}

impl TaskOutcome {
    pub fn phase(&self) -> TaskPhase {
        match self {
            TaskOutcome::Completed { .. } => TaskPhase::Completed,
            TaskOutcome::Failed { .. } => TaskPhase::Failed,
            TaskOutcome::Cancelled { .. } => TaskPhase::Cancelled,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            TaskOutcome::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Terminal artifact of a task. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub goal: String,
    pub final_phase: TaskPhase,
    /// Actions the actuator ran to a success or failure. Denied steps and a
    /// step interrupted by cancellation are recorded but not counted.
    pub steps_taken: u32,
    pub outcome: TaskOutcome,
    pub last_observation: Option<ObservationRef>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// One autonomous run, as fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub goal: String,
    pub permissions: PermissionSet,
    pub max_steps: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    /// A zero budget is raised to one so every task can attempt at least one step.
    pub fn new(goal: impl Into<String>, permissions: PermissionSet, max_steps: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            permissions,
            max_steps: max_steps.max(1),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Live status snapshot reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub phase: TaskPhase,
    pub steps: u32,
    pub records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_match_serde() {
        for reason in [
            FailureReason::PerceptionUnavailable,
            FailureReason::PlannerBlocked,
            FailureReason::PermissionExhausted,
            FailureReason::StepBudgetExceeded,
        ] {
            assert_eq!(serde_json::to_value(reason).unwrap(), reason.to_string());
        }
    }

    #[test]
    fn zero_budget_is_clamped() {
        let task = Task::new("noop", PermissionSet::empty(), 0);
        assert_eq!(task.max_steps, 1);
    }

    #[test]
    fn outcome_phase() {
        let failed = TaskOutcome::Failed { reason: FailureReason::Internal, detail: String::new() };
        assert_eq!(failed.phase(), TaskPhase::Failed);
        assert!(failed.phase().is_terminal());
        assert_eq!(failed.failure_reason(), Some(FailureReason::Internal));
        assert!(!TaskPhase::Acting.is_terminal());
    }
}
