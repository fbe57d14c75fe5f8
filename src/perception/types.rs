use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    Input,
    Link,
    Text,
    Image,
    Checkbox,
    Menu,
    MenuItem,
    Icon,
    Window,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIElement {
    pub id: String,
    pub node_type: ElementType,
    /// Normalized bounding box [xmin, ymin, xmax, ymax] in range 0.0–1.0
    pub bbox: [f32; 4],
    pub content: Option<String>,
    pub confidence: f32,
}

impl UIElement {
    /// Centre of the bounding box in physical pixel coordinates.
    pub fn center_physical(&self, resolution: (u32, u32)) -> (i32, i32) {
        let cx = ((self.bbox[0] + self.bbox[2]) / 2.0 * resolution.0 as f32).round() as i32;
        let cy = ((self.bbox[1] + self.bbox[3]) / 2.0 * resolution.1 as f32).round() as i32;
        (cx, cy)
    }
}

/// Structured description of the screen produced by a perception backend.
/// The orchestrator treats it as opaque and only forwards it to the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Physical (width, height) of the captured screen.
    pub resolution: (u32, u32),
    #[serde(default)]
    pub elements: Vec<UIElement>,
    /// Free-text summary from the vision backend, if any.
    #[serde(default)]
    pub summary: Option<String>,
    /// Encoded screenshot (PNG/JPEG) for vision-capable planners.
    #[serde(default, skip_serializing)]
    pub screenshot: Option<Vec<u8>>,
}

/// One perceived scene, numbered per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub seq: u64,
    pub scene: SceneDescription,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Observation {
    pub fn reference(&self) -> ObservationRef {
        ObservationRef {
            seq: self.seq,
            captured_at: self.captured_at,
            summary: self.scene.summary.clone(),
        }
    }
}

/// What history keeps of an observation once the cycle has moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRef {
    pub seq: u64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}
