// Physical input primitives. OS bindings implement this trait; the crate only
// routes actions onto it.
use async_trait::async_trait;

use crate::agent_engine::action::MouseButton;
use crate::errors::PilotResult;

#[async_trait]
pub trait InputDriver: Send + Sync {
    async fn mouse_click(&self, x: i32, y: i32, button: MouseButton) -> PilotResult<()>;

    async fn mouse_double_click(&self, x: i32, y: i32) -> PilotResult<()>;

    async fn mouse_move(&self, x: i32, y: i32) -> PilotResult<()>;

    /// Positive scrolls down.
    async fn scroll(&self, amount: i32) -> PilotResult<()>;

    /// Direct key simulation, suited to Latin text.
    async fn type_text(&self, text: &str) -> PilotResult<()>;

    /// Clipboard + paste path for text that key simulation cannot produce.
    async fn paste_text(&self, text: &str) -> PilotResult<()>;

    async fn press_key(&self, key: &str) -> PilotResult<()>;

    /// Holds `keys` in order then releases them in reverse, e.g. ["ctrl", "s"].
    async fn press_hotkey(&self, keys: &[String]) -> PilotResult<()>;
}
