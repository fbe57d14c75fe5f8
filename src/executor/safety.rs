// Permission gate: a pure check of an action's required capabilities against
// the task's granted set.
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent_engine::action::{Action, ActionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    PointerControl,
    KeyboardInput,
    FilesystemRead,
    FilesystemWrite,
    ProcessLaunch,
    Delay,
    /// Required by actions of unrecognized kind. Never grantable.
    UnknownAction,
}

impl Capability {
    /// Every capability that can appear in a [`PermissionSet`].
    pub const GRANTABLE: [Capability; 6] = [
        Capability::PointerControl,
        Capability::KeyboardInput,
        Capability::FilesystemRead,
        Capability::FilesystemWrite,
        Capability::ProcessLaunch,
        Capability::Delay,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Capability::PointerControl => "pointer-control",
            Capability::KeyboardInput => "keyboard-input",
            Capability::FilesystemRead => "filesystem-read",
            Capability::FilesystemWrite => "filesystem-write",
            Capability::ProcessLaunch => "process-launch",
            Capability::Delay => "delay",
            Capability::UnknownAction => "unknown-action",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The capability table. Each kind maps to a fixed, non-empty set.
pub fn required_capabilities(kind: &ActionKind) -> &'static [Capability] {
    match kind {
        ActionKind::PointerClick { .. }
        | ActionKind::PointerDoubleClick { .. }
        | ActionKind::PointerMove { .. }
        | ActionKind::PointerScroll { .. } => &[Capability::PointerControl],
        ActionKind::KeyType { .. } | ActionKind::KeyPress { .. } | ActionKind::KeyCombo { .. } => {
            &[Capability::KeyboardInput]
        }
        ActionKind::FileRead { .. } => &[Capability::FilesystemRead],
        ActionKind::FileWrite { .. } => &[Capability::FilesystemWrite],
        ActionKind::LaunchProcess { .. } => &[Capability::ProcessLaunch],
        ActionKind::Wait { .. } => &[Capability::Delay],
        ActionKind::Unknown { .. } => &[Capability::UnknownAction],
    }
}

/// Capabilities granted to one task. Fixed at task creation; there is no
/// mutating API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct PermissionSet {
    granted: BTreeSet<Capability>,
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.granted.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.granted.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<Capability> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut granted = BTreeSet::new();
        for cap in iter {
            if cap == Capability::UnknownAction {
                tracing::warn!("refusing to grant the unknown-action capability");
                continue;
            }
            granted.insert(cap);
        }
        Self { granted }
    }
}

impl From<Vec<Capability>> for PermissionSet {
    fn from(caps: Vec<Capability>) -> Self {
        caps.into_iter().collect()
    }
}

impl From<PermissionSet> for Vec<Capability> {
    fn from(set: PermissionSet) -> Self {
        set.granted.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Authorized,
    Denied { missing: Vec<Capability> },
}

impl Verdict {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Verdict::Authorized)
    }
}

/// Authorized iff every required capability is granted.
pub fn evaluate(action: &Action, permissions: &PermissionSet) -> Verdict {
    let missing: Vec<Capability> = action
        .required_capabilities()
        .iter()
        .copied()
        .filter(|cap| !permissions.contains(*cap))
        .collect();
    if missing.is_empty() {
        Verdict::Authorized
    } else {
        Verdict::Denied { missing }
    }
}
