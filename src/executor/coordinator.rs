// Exclusive access to the real screen and input devices across tasks.
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Shared by every task of a process. Only the holder of an
/// [`ActuationLease`] may drive the input devices.
#[derive(Clone, Default)]
pub struct ActuationArbiter {
    devices: Arc<Mutex<()>>,
}

impl ActuationArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds the devices.
    pub async fn acquire(&self, task_id: Uuid) -> ActuationLease {
        let guard = Arc::clone(&self.devices).lock_owned().await;
        tracing::debug!(task_id = %task_id, "actuation lease acquired");
        ActuationLease { task_id, _guard: guard }
    }

    pub fn is_held(&self) -> bool {
        self.devices.try_lock().is_err()
    }
}

/// Released on drop, whichever way the acting phase ends.
pub struct ActuationLease {
    task_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl ActuationLease {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}

impl Drop for ActuationLease {
    fn drop(&mut self) {
        tracing::debug!(task_id = %self.task_id, "actuation lease released");
    }
}
