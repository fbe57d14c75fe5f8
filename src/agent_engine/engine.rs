use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::action::Action;
use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::agent_engine::history::{HistoryLog, StepDraft, StepOutcome};
use crate::agent_engine::loop_control::{Counters, LoopLimits};
use crate::agent_engine::state::{transition, LoopEvent, LoopState};
use crate::agent_engine::task::{Task, TaskOutcome, TaskPhase, TaskResult, TaskStatus};
use crate::errors::PilotError;
use crate::executor::coordinator::ActuationArbiter;
use crate::executor::dispatcher::ActuatorPort;
use crate::executor::safety::{self, Verdict};
use crate::llm::provider::PlannerPort;
use crate::perception::traits::PerceptionPort;
use crate::perception::types::Observation;

/// The three collaborators a task drives.
#[derive(Clone)]
pub struct Ports {
    pub perception: Arc<dyn PerceptionPort>,
    pub planner: Arc<dyn PlannerPort>,
    pub actuator: Arc<dyn ActuatorPort>,
}

/// Drives one task through the perceive-plan-act loop until it reaches a
/// terminal state. All decisions are made by [`transition`]; the runner only
/// performs the collaborator call each state asks for.
pub struct TaskRunner {
    task: Task,
    limits: LoopLimits,
    ports: Ports,
    arbiter: ActuationArbiter,
    history: Arc<HistoryLog>,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
    events: EventBus,
    next_observation_seq: u64,
}

impl TaskRunner {
    pub fn new(task: Task, limits: LoopLimits, ports: Ports, arbiter: ActuationArbiter) -> Self {
        let (status, _) = watch::channel(TaskStatus {
            phase: TaskPhase::Created,
            steps: 0,
            records: 0,
        });
        Self {
            task,
            limits,
            ports,
            arbiter,
            history: Arc::new(HistoryLog::new()),
            cancel: CancellationToken::new(),
            status,
            events: EventBus::default(),
            next_observation_seq: 1,
        }
    }

    pub fn with_history(mut self, history: Arc<HistoryLog>) -> Self {
        self.history = history;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn history(&self) -> Arc<HistoryLog> {
        Arc::clone(&self.history)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    pub async fn run(mut self) -> TaskResult {
        tracing::info!(
            task_id = %self.task.id,
            goal = %self.task.goal,
            max_steps = self.limits.max_steps,
            permissions = ?self.task.permissions,
            "task started"
        );
        let mut state = LoopState::Created;
        let mut counters = Counters::default();
        let mut last_phase = None;

        loop {
            let phase = state.phase();
            if last_phase != Some(phase) {
                self.publish_phase(phase, &counters);
                last_phase = Some(phase);
            }

            if let LoopState::Terminal(outcome) = &state {
                return self.finish(outcome.clone(), &counters);
            }

            // A resolved step is committed even after cancellation.
            let recording = matches!(state, LoopState::Recording { .. });
            let event = if self.cancel.is_cancelled() && !recording {
                tracing::info!(task_id = %self.task.id, phase = %phase, "cancellation observed");
                LoopEvent::Cancelled
            } else {
                self.step(&state, &counters).await
            };

            (state, counters) = transition(state, event, counters, &self.limits);
        }
    }

    async fn step(&mut self, state: &LoopState, counters: &Counters) -> LoopEvent {
        match state {
            LoopState::Created => LoopEvent::Start,
            LoopState::Perceiving => self.perceive(counters.perception_failures).await,
            LoopState::Planning { observation } => {
                self.plan(observation, counters.planner_failures).await
            }
            LoopState::Gating { action, .. } => self.gate(action),
            LoopState::Acting { observation, action } => self.act(observation, action).await,
            LoopState::Recording { draft, .. } => {
                self.record(draft.clone());
                LoopEvent::Recorded
            }
            LoopState::Terminal(_) => LoopEvent::Cancelled,
        }
    }

    async fn perceive(&mut self, failures: u32) -> LoopEvent {
        if failures > 0 && !self.backoff("perception", failures).await {
            return LoopEvent::Cancelled;
        }

        let timeout = self.limits.perception_timeout;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopEvent::Cancelled,
            r = tokio::time::timeout(timeout, self.ports.perception.capture(&self.cancel)) => r,
        };
        if self.cancel.is_cancelled() {
            tracing::debug!(
                task_id = %self.task.id,
                "discarding perception result after cancellation"
            );
            return LoopEvent::Cancelled;
        }

        match result {
            Ok(Ok(scene)) => {
                let observation = Observation {
                    seq: self.next_observation_seq,
                    scene,
                    captured_at: chrono::Utc::now(),
                };
                self.next_observation_seq += 1;
                self.history.note_observation(observation.reference());
                tracing::debug!(
                    task_id = %self.task.id,
                    seq = observation.seq,
                    elements = observation.scene.elements.len(),
                    "observation captured"
                );
                LoopEvent::Perceived(Arc::new(observation))
            }
            Ok(Err(e)) => {
                tracing::warn!(task_id = %self.task.id, error = %e, "perception failed");
                LoopEvent::PerceptionFailed(e.to_string())
            }
            Err(_) => {
                let e = timeout_error("perception", timeout);
                tracing::warn!(task_id = %self.task.id, error = %e, "perception timed out");
                LoopEvent::PerceptionFailed(e.to_string())
            }
        }
    }

    async fn plan(&mut self, observation: &Arc<Observation>, failures: u32) -> LoopEvent {
        if failures > 0 && !self.backoff("planner", failures).await {
            return LoopEvent::Cancelled;
        }

        let history = self.history.snapshot();
        let timeout = self.limits.planner_timeout;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopEvent::Cancelled,
            r = tokio::time::timeout(
                timeout,
                self.ports.planner.propose(&self.task.goal, observation, &history, &self.cancel),
            ) => r,
        };
        if self.cancel.is_cancelled() {
            return LoopEvent::Cancelled;
        }

        match result {
            Ok(Ok(proposal)) => {
                tracing::info!(task_id = %self.task.id, ?proposal, "planner proposal");
                LoopEvent::Proposed(proposal)
            }
            Ok(Err(e)) => {
                tracing::warn!(task_id = %self.task.id, error = %e, "planner failed");
                LoopEvent::PlannerFailed(e.to_string())
            }
            Err(_) => {
                let e = timeout_error("planner", timeout);
                tracing::warn!(task_id = %self.task.id, error = %e, "planner timed out");
                LoopEvent::PlannerFailed(e.to_string())
            }
        }
    }

    fn gate(&self, action: &Action) -> LoopEvent {
        let verdict = safety::evaluate(action, &self.task.permissions);
        if let Verdict::Denied { missing } = &verdict {
            tracing::warn!(
                task_id = %self.task.id,
                kind = %action.kind.name(),
                missing = ?missing,
                "action denied"
            );
        }
        LoopEvent::Gated(verdict)
    }

    async fn act(&mut self, observation: &Arc<Observation>, action: &Action) -> LoopEvent {
        let lease = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopEvent::Cancelled,
            lease = self.arbiter.acquire(self.task.id) => lease,
        };

        let timeout = self.limits.actuator_timeout;
        let act_token = self.cancel.child_token();
        // An action that finished is reported as finished even if the
        // cancellation landed in the same instant.
        let result = tokio::select! {
            biased;
            r = tokio::time::timeout(
                timeout,
                self.ports.actuator.execute(action, &act_token),
            ) => Some(r),
            _ = self.cancel.cancelled() => None,
        };
        // Stops an actuator that outlived its timeout.
        act_token.cancel();
        drop(lease);

        let outcome = match result {
            Some(Ok(Ok(detail))) => StepOutcome::Succeeded { detail },
            Some(Ok(Err(PilotError::Cancelled))) if self.cancel.is_cancelled() => {
                StepOutcome::Interrupted
            }
            Some(Ok(Err(e))) => StepOutcome::Failed { reason: e.to_string() },
            Some(Err(_)) => StepOutcome::Failed {
                reason: timeout_error("actuator", timeout).to_string(),
            },
            None => StepOutcome::Interrupted,
        };

        if outcome == StepOutcome::Interrupted {
            tracing::warn!(
                task_id = %self.task.id,
                kind = %action.kind.name(),
                "action interrupted by cancellation"
            );
            self.record(StepDraft {
                observation_seq: observation.seq,
                action: action.clone(),
                verdict: Verdict::Authorized,
                outcome,
            });
            return LoopEvent::Cancelled;
        }

        tracing::info!(
            task_id = %self.task.id,
            kind = %action.kind.name(),
            success = outcome.is_success(),
            "action executed"
        );
        LoopEvent::Executed(outcome)
    }

    fn record(&self, draft: StepDraft) {
        let record = self.history.append(draft);
        tracing::info!(
            task_id = %self.task.id,
            seq = record.seq,
            kind = %record.action.kind.name(),
            outcome = ?record.outcome,
            "step recorded"
        );
        self.events.publish(TaskEvent::StepRecorded {
            task_id: self.task.id,
            record,
        });
    }

    /// Sleeps before a retry. Returns false if cancelled meanwhile.
    async fn backoff(&self, stage: &'static str, failures: u32) -> bool {
        let delay = self.limits.backoff(failures);
        tracing::info!(
            task_id = %self.task.id,
            stage,
            failures,
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn publish_phase(&self, phase: TaskPhase, counters: &Counters) {
        tracing::debug!(
            task_id = %self.task.id,
            phase = %phase,
            steps = counters.steps,
            "phase changed"
        );
        self.status.send_replace(TaskStatus {
            phase,
            steps: counters.steps,
            records: self.history.len(),
        });
        self.events.publish(TaskEvent::PhaseChanged {
            task_id: self.task.id,
            phase,
            steps: counters.steps,
        });
    }

    fn finish(&self, outcome: TaskOutcome, counters: &Counters) -> TaskResult {
        let result = TaskResult {
            task_id: self.task.id,
            goal: self.task.goal.clone(),
            final_phase: outcome.phase(),
            steps_taken: counters.steps,
            outcome,
            last_observation: self.history.last_observation(),
            finished_at: chrono::Utc::now(),
        };
        match &result.outcome {
            TaskOutcome::Completed { summary } => {
                tracing::info!(
                    task_id = %self.task.id,
                    steps = counters.steps,
                    summary = %summary,
                    "task completed"
                )
            }
            TaskOutcome::Failed { reason, detail } => {
                tracing::warn!(
                    task_id = %self.task.id,
                    steps = counters.steps,
                    reason = %reason,
                    detail = %detail,
                    "task failed"
                )
            }
            TaskOutcome::Cancelled { during } => {
                tracing::info!(
                    task_id = %self.task.id,
                    steps = counters.steps,
                    during = %during,
                    "task cancelled"
                )
            }
        }
        self.history.seal(&result);
        self.events.publish(TaskEvent::Finished {
            task_id: self.task.id,
            result: result.clone(),
        });
        result
    }
}

fn timeout_error(stage: &'static str, after: std::time::Duration) -> PilotError {
    PilotError::Timeout {
        stage,
        after_ms: after.as_millis() as u64,
    }
}
