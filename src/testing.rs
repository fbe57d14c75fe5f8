//! In-memory collaborators for loop and manager tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::action::{Action, ActionKind, MouseButton, Proposal};
use crate::agent_engine::history::StepRecord;
use crate::errors::{PilotError, PilotResult};
use crate::executor::dispatcher::ActuatorPort;
use crate::llm::provider::PlannerPort;
use crate::perception::traits::PerceptionPort;
use crate::perception::types::{Observation, SceneDescription};

pub fn click(x: i32, y: i32) -> ActionKind {
    ActionKind::PointerClick { x, y, button: MouseButton::Left }
}

pub fn act(kind: ActionKind) -> Proposal {
    Proposal::Act { action: Action::new(kind) }
}

#[derive(Default)]
pub struct FakePerception {
    fail: bool,
    calls: AtomicUsize,
}

impl FakePerception {
    pub fn failing() -> Self {
        Self { fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerceptionPort for FakePerception {
    async fn capture(&self, _cancel: &CancellationToken) -> PilotResult<SceneDescription> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(PilotError::Perception("display unavailable".into()));
        }
        Ok(SceneDescription {
            resolution: (1920, 1080),
            summary: Some(format!("desktop #{n}")),
            ..SceneDescription::default()
        })
    }
}

/// Signals `started` then never returns.
#[derive(Default)]
pub struct HangingPerception {
    pub started: Notify,
}

#[async_trait]
impl PerceptionPort for HangingPerception {
    async fn capture(&self, _cancel: &CancellationToken) -> PilotResult<SceneDescription> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// Replays scripted answers, then the fallback forever.
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<PilotResult<Proposal>>>,
    fallback: Result<Proposal, String>,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<PilotResult<Proposal>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(Proposal::Blocked { reason: "script exhausted".into() }),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(proposal: Proposal) -> Self {
        Self::new(vec![]).with_fallback(Ok(proposal))
    }

    pub fn with_fallback(mut self, fallback: PilotResult<Proposal>) -> Self {
        self.fallback = fallback.map_err(|e| e.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// History length passed on each call, in order.
    pub fn seen_history_lens(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlannerPort for ScriptedPlanner {
    async fn propose(
        &self,
        _goal: &str,
        _observation: &Observation,
        history: &[StepRecord],
        _cancel: &CancellationToken,
    ) -> PilotResult<Proposal> {
        self.seen.lock().unwrap().push(history.len());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(answer) => answer,
            None => self.fallback.clone().map_err(PilotError::Planner),
        }
    }
}

#[derive(Default)]
pub struct FakeActuator {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeActuator {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActuatorPort for FakeActuator {
    async fn execute(&self, action: &Action, _cancel: &CancellationToken) -> PilotResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(PilotError::Actuator(format!("{} target not found", action.kind.name())))
        } else {
            Ok(format!("did {}", action.kind.name()))
        }
    }
}

/// Signals `started` then ignores everything, including cancellation.
#[derive(Default)]
pub struct BlockingActuator {
    pub started: Notify,
}

#[async_trait]
impl ActuatorPort for BlockingActuator {
    async fn execute(&self, _action: &Action, _cancel: &CancellationToken) -> PilotResult<String> {
        self.started.notify_one();
        std::future::pending().await
    }
}
