use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agent_engine::history::StepRecord;
use crate::agent_engine::task::{TaskPhase, TaskResult};

/// Notifications for host UIs. Delivery is lossy: a slow
/// subscriber may miss events and should fall back to polling status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    PhaseChanged { task_id: Uuid, phase: TaskPhase, steps: u32 },
    StepRecorded { task_id: Uuid, record: StepRecord },
    Finished { task_id: Uuid, result: TaskResult },
}

impl TaskEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            TaskEvent::PhaseChanged { task_id, .. }
            | TaskEvent::StepRecorded { task_id, .. }
            | TaskEvent::Finished { task_id, .. } => *task_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Having no subscribers is normal and not an error.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
