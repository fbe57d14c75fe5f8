pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use crate::agent_engine::action::{Action, ActionKind, MouseButton, Proposal};
pub use crate::agent_engine::engine::{Ports, TaskRunner};
pub use crate::agent_engine::event_bus::TaskEvent;
pub use crate::agent_engine::history::{StepOutcome, StepRecord};
pub use crate::agent_engine::manager::{TaskManager, TaskSummary};
pub use crate::agent_engine::task::{FailureReason, TaskOutcome, TaskPhase, TaskResult, TaskStatus};
pub use crate::config::AppConfig;
pub use crate::errors::{PilotError, PilotResult};
pub use crate::executor::dispatcher::{ActuatorPort, DesktopActuator};
pub use crate::executor::input::InputDriver;
pub use crate::executor::safety::{Capability, PermissionSet, Verdict};
pub use crate::llm::provider::PlannerPort;
pub use crate::llm::providers::openai_compatible::ChatPlanner;
pub use crate::perception::traits::PerceptionPort;
pub use crate::perception::types::{Observation, SceneDescription};

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter. Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Host start-up: tracing, `.env`, then config.toml (defaults if absent or
/// unreadable).
pub fn bootstrap() -> AppConfig {
    init_tracing();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config; using defaults");
            AppConfig::default()
        }
    }
}

/// Wires a [`TaskManager`] whose planner is a [`ChatPlanner`] built from
/// `config.planner`. Perception and actuation are supplied by the host.
pub fn manager_from_config(
    config: &AppConfig,
    perception: Arc<dyn PerceptionPort>,
    actuator: Arc<dyn ActuatorPort>,
) -> PilotResult<TaskManager> {
    let planner: Arc<dyn PlannerPort> = Arc::new(ChatPlanner::from_config(&config.planner)?);
    Ok(TaskManager::new(
        Ports { perception, planner, actuator },
        config.agent.clone(),
        config.history.clone(),
    ))
}
