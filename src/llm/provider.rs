use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::action::Proposal;
use crate::agent_engine::history::StepRecord;
use crate::errors::PilotResult;
use crate::perception::types::Observation;

/// Decides the next step toward a goal.
///
/// `history` is read-only context holding every resolved step so far, in
/// append order. An `Err` is treated as a transient planner failure and retried.
#[async_trait]
pub trait PlannerPort: Send + Sync {
    async fn propose(
        &self,
        goal: &str,
        observation: &Observation,
        history: &[StepRecord],
        cancel: &CancellationToken,
    ) -> PilotResult<Proposal>;
}
