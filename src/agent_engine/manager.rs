use std::collections::HashMap;
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent_engine::engine::{Ports, TaskRunner};
use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::agent_engine::history::{journal_dir, HistoryLog, StepRecord};
use crate::agent_engine::loop_control::LoopLimits;
use crate::agent_engine::task::{
    FailureReason, Task, TaskOutcome, TaskPhase, TaskResult, TaskStatus,
};
use crate::config::{AgentConfig, HistoryConfig};
use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::ActuationArbiter;
use crate::executor::safety::PermissionSet;

struct TaskHandle {
    task: Task,
    cancel: CancellationToken,
    history: Arc<HistoryLog>,
    status: watch::Receiver<TaskStatus>,
    result: watch::Receiver<Option<TaskResult>>,
}

impl TaskHandle {
    fn status(&self) -> TaskStatus {
        let mut status = *self.status.borrow();
        // The runner's status sender is gone if it panicked.
        if let Some(result) = self.result.borrow().as_ref() {
            status.phase = result.final_phase;
            status.steps = result.steps_taken;
            status.records = self.history.len();
        }
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub goal: String,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Host-facing entry point: starts tasks on the tokio runtime and answers
/// queries about them. Every task shares one [`ActuationArbiter`], so at most
/// one of them drives the input devices at any instant.
pub struct TaskManager {
    ports: Ports,
    arbiter: ActuationArbiter,
    agent: AgentConfig,
    history: HistoryConfig,
    events: EventBus,
    tasks: RwLock<HashMap<Uuid, TaskHandle>>,
}

impl TaskManager {
    pub fn new(ports: Ports, agent: AgentConfig, history: HistoryConfig) -> Self {
        Self {
            ports,
            arbiter: ActuationArbiter::new(),
            agent,
            history,
            events: EventBus::default(),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn arbiter(&self) -> &ActuationArbiter {
        &self.arbiter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Spawns a runner for `goal`. `step_budget` of `None` uses the
    /// configured default; zero is raised to one.
    pub async fn start_task(
        &self,
        goal: impl Into<String>,
        permissions: PermissionSet,
        step_budget: Option<u32>,
    ) -> Uuid {
        let budget = step_budget.unwrap_or(self.agent.default_step_budget);
        let task = Task::new(goal, permissions, budget);
        let id = task.id;
        let limits = LoopLimits::from_config(&self.agent, task.max_steps);

        let journal = self
            .history
            .journal
            .then(|| journal_dir(self.history.dir.as_deref()).join(format!("task_{id}.jsonl")));
        let history = Arc::new(HistoryLog::with_journal(journal));

        let runner = TaskRunner::new(task.clone(), limits, self.ports.clone(), self.arbiter.clone())
            .with_history(Arc::clone(&history))
            .with_events(self.events.clone());
        let cancel = runner.cancel_token();
        let status = runner.status();
        let (result_tx, result_rx) = watch::channel(None);

        let join = tokio::spawn(runner.run());
        let supervised_task = task.clone();
        let supervised_history = Arc::clone(&history);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match join.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        task_id = %supervised_task.id,
                        error = %e,
                        "task runner crashed"
                    );
                    let result =
                        crashed_result(&supervised_task, &supervised_history, e.to_string());
                    supervised_history.seal(&result);
                    events.publish(TaskEvent::Finished {
                        task_id: supervised_task.id,
                        result: result.clone(),
                    });
                    result
                }
            };
            result_tx.send_replace(Some(result));
        });

        tracing::info!(task_id = %id, max_steps = task.max_steps, "task registered");
        self.tasks.write().await.insert(
            id,
            TaskHandle { task, cancel, history, status, result: result_rx },
        );
        id
    }

    /// Requests cooperative cancellation. Cancelling a finished task is a
    /// no-op.
    pub async fn cancel_task(&self, id: Uuid) -> PilotResult<()> {
        let tasks = self.tasks.read().await;
        let handle = tasks.get(&id).ok_or(PilotError::TaskNotFound(id))?;
        if !handle.status().phase.is_terminal() {
            tracing::info!(task_id = %id, "cancellation requested");
        }
        handle.cancel.cancel();
        Ok(())
    }

    pub async fn get_status(&self, id: Uuid) -> PilotResult<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks.get(&id).map(TaskHandle::status).ok_or(PilotError::TaskNotFound(id))
    }

    /// `None` until the task is terminal.
    pub async fn get_result(&self, id: Uuid) -> PilotResult<Option<TaskResult>> {
        let tasks = self.tasks.read().await;
        let handle = tasks.get(&id).ok_or(PilotError::TaskNotFound(id))?;
        let result = handle.result.borrow().clone();
        Ok(result)
    }

    pub async fn wait_result(&self, id: Uuid) -> PilotResult<TaskResult> {
        let mut rx = {
            let tasks = self.tasks.read().await;
            tasks.get(&id).ok_or(PilotError::TaskNotFound(id))?.result.clone()
        };
        let result = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PilotError::TaskNotFound(id))?
            .clone();
        result.ok_or(PilotError::TaskNotFound(id))
    }

    /// Records in append order; the stream ends once the task is terminal
    /// and every record has been yielded.
    pub async fn stream_history(
        &self,
        id: Uuid,
    ) -> PilotResult<impl Stream<Item = StepRecord> + Send + 'static> {
        let tasks = self.tasks.read().await;
        let handle = tasks.get(&id).ok_or(PilotError::TaskNotFound(id))?;
        Ok(handle.history.stream())
    }

    pub async fn history_snapshot(&self, id: Uuid) -> PilotResult<Vec<StepRecord>> {
        let tasks = self.tasks.read().await;
        let handle = tasks.get(&id).ok_or(PilotError::TaskNotFound(id))?;
        Ok(handle.history.snapshot())
    }

    pub async fn list_tasks(&self) -> Vec<TaskSummary> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<TaskSummary> = tasks
            .values()
            .map(|h| TaskSummary {
                id: h.task.id,
                goal: h.task.goal.clone(),
                status: h.status(),
                created_at: h.task.created_at,
            })
            .collect();
        list.sort_by_key(|s| s.created_at);
        list
    }

    /// Cancels the task if it is still running and forgets it.
    pub async fn discard_task(&self, id: Uuid) -> PilotResult<()> {
        let handle = self.tasks.write().await.remove(&id).ok_or(PilotError::TaskNotFound(id))?;
        handle.cancel.cancel();
        tracing::info!(task_id = %id, "task discarded");
        Ok(())
    }
}

fn crashed_result(task: &Task, history: &HistoryLog, error: String) -> TaskResult {
    let steps = history
        .snapshot()
        .iter()
        .filter(|r| r.outcome.was_executed())
        .count() as u32;
    TaskResult {
        task_id: task.id,
        goal: task.goal.clone(),
        final_phase: TaskPhase::Failed,
        steps_taken: steps,
        outcome: TaskOutcome::Failed { reason: FailureReason::Internal, detail: error },
        last_observation: history.last_observation(),
        finished_at: chrono::Utc::now(),
    }
}
