use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::executor::safety::{self, Capability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// Concrete unit of actuation proposed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    PointerClick { x: i32, y: i32, #[serde(default)] button: MouseButton },
    PointerDoubleClick { x: i32, y: i32 },
    PointerMove { x: i32, y: i32 },
    /// Positive scrolls down, negative up.
    PointerScroll { amount: i32 },
    KeyType { text: String },
    KeyPress { key: String },
    KeyCombo { keys: Vec<String> },
    FileRead { path: String },
    FileWrite { path: String, contents: String },
    LaunchProcess { program: String, #[serde(default)] args: Vec<String> },
    Wait { millis: u64 },
    /// Anything the planner named that this crate does not know how to run.
    Unknown { name: String },
}

impl ActionKind {
    pub fn name(&self) -> &str {
        match self {
            ActionKind::PointerClick { .. } => "pointer_click",
            ActionKind::PointerDoubleClick { .. } => "pointer_double_click",
            ActionKind::PointerMove { .. } => "pointer_move",
            ActionKind::PointerScroll { .. } => "pointer_scroll",
            ActionKind::KeyType { .. } => "key_type",
            ActionKind::KeyPress { .. } => "key_press",
            ActionKind::KeyCombo { .. } => "key_combo",
            ActionKind::FileRead { .. } => "file_read",
            ActionKind::FileWrite { .. } => "file_write",
            ActionKind::LaunchProcess { .. } => "launch_process",
            ActionKind::Wait { .. } => "wait",
            ActionKind::Unknown { name } => name,
        }
    }
}

/// An immutable proposal. A rejected or failed action is never edited; the
/// planner produces a new one on the next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Planner's stated reason, kept for the audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self { kind, reasoning: None }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn required_capabilities(&self) -> &'static [Capability] {
        safety::required_capabilities(&self.kind)
    }

    /// Structural hash of the kind and its parameters (reasoning excluded),
    /// used to spot a planner proposing the same thing over and over.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;

        let mut hasher = DefaultHasher::new();
        serde_json::to_string(&self.kind)
            .unwrap_or_else(|_| self.kind.name().to_string())
            .hash(&mut hasher);
        hasher.finish()
    }
}

/// What the planner may answer for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Proposal {
    Act { action: Action },
    Done { summary: String },
    Blocked { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat_with_kind_tag() {
        let kind = ActionKind::PointerClick { x: 10, y: 20, button: MouseButton::Left };
        let action = Action::new(kind).with_reasoning("open editor");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "pointer_click");
        assert_eq!(json["x"], 10);
        assert_eq!(json["reasoning"], "open editor");
    }

    #[test]
    fn fingerprint_ignores_reasoning() {
        let a = Action::new(ActionKind::KeyType { text: "Hello".into() }).with_reasoning("first");
        let b = Action::new(ActionKind::KeyType { text: "Hello".into() }).with_reasoning("again");
        let c = Action::new(ActionKind::KeyType { text: "Hello!".into() });
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn unknown_kind_reports_planner_name() {
        let action = Action::new(ActionKind::Unknown { name: "format_disk".into() });
        assert_eq!(action.kind.name(), "format_disk");
    }
}
