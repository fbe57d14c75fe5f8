use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::action::{Action, ActionKind};
use crate::errors::{PilotError, PilotResult};
use crate::executor::input::InputDriver;
use crate::executor::text_input::contains_cjk;

/// Executes exactly the side effect an action describes, nothing more.
/// `Ok` carries a short human-readable detail for the step record.
#[async_trait]
pub trait ActuatorPort: Send + Sync {
    async fn execute(&self, action: &Action, cancel: &CancellationToken) -> PilotResult<String>;
}

/// Longest file excerpt echoed back to the planner after a read.
const READ_PREVIEW_CHARS: usize = 4000;

/// Routes pointer and keyboard kinds to an [`InputDriver`], file kinds to
/// `tokio::fs`, process launches to `tokio::process` and waits to a
/// cancellable sleep.
pub struct DesktopActuator {
    driver: Arc<dyn InputDriver>,
}

impl DesktopActuator {
    pub fn new(driver: Arc<dyn InputDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl ActuatorPort for DesktopActuator {
    async fn execute(&self, action: &Action, cancel: &CancellationToken) -> PilotResult<String> {
        tracing::debug!(kind = %action.kind.name(), "dispatching action");
        match &action.kind {
            ActionKind::PointerClick { x, y, button } => {
                self.driver.mouse_click(*x, *y, *button).await?;
                Ok(format!("Clicked {button:?} at ({x},{y})"))
            }
            ActionKind::PointerDoubleClick { x, y } => {
                self.driver.mouse_double_click(*x, *y).await?;
                Ok(format!("Double-clicked at ({x},{y})"))
            }
            ActionKind::PointerMove { x, y } => {
                self.driver.mouse_move(*x, *y).await?;
                Ok(format!("Moved pointer to ({x},{y})"))
            }
            ActionKind::PointerScroll { amount } => {
                self.driver.scroll(*amount).await?;
                Ok(format!("Scrolled {amount}"))
            }
            ActionKind::KeyType { text } => {
                if contains_cjk(text) {
                    self.driver.paste_text(text).await?;
                } else {
                    self.driver.type_text(text).await?;
                }
                Ok(format!("Typed: {text}"))
            }
            ActionKind::KeyPress { key } => {
                self.driver.press_key(key).await?;
                Ok(format!("Pressed {key}"))
            }
            ActionKind::KeyCombo { keys } => {
                if keys.is_empty() {
                    return Err(PilotError::Actuator("key combo without keys".into()));
                }
                self.driver.press_hotkey(keys).await?;
                Ok(format!("Hotkey: {}", keys.join("+")))
            }
            ActionKind::FileRead { path } => {
                let content = tokio::fs::read_to_string(path).await?;
                let preview: String = content.chars().take(READ_PREVIEW_CHARS).collect();
                Ok(format!("Read {} bytes from {path}:\n{preview}", content.len()))
            }
            ActionKind::FileWrite { path, contents } => {
                tokio::fs::write(path, contents).await?;
                Ok(format!("Wrote {} bytes to {path}", contents.len()))
            }
            ActionKind::LaunchProcess { program, args } => {
                let child = tokio::process::Command::new(program).args(args).spawn()?;
                let pid = child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".into());
                Ok(format!("Launched {program} (pid {pid})"))
            }
            ActionKind::Wait { millis } => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(PilotError::Cancelled),
                    _ = tokio::time::sleep(std::time::Duration::from_millis(*millis)) => {
                        Ok(format!("Waited {millis}ms"))
                    }
                }
            }
            ActionKind::Unknown { name } => {
                Err(PilotError::Actuator(format!("unsupported action: {name}")))
            }
        }
    }
}
