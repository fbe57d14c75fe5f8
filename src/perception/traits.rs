use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::PilotResult;
use crate::perception::types::SceneDescription;

/// Turns the current screen into a [`SceneDescription`].
///
/// Must be safe to call repeatedly. Implementations that block for long
/// should watch `cancel` and bail out early with [`crate::errors::PilotError::Cancelled`].
#[async_trait]
pub trait PerceptionPort: Send + Sync {
    async fn capture(&self, cancel: &CancellationToken) -> PilotResult<SceneDescription>;
}
