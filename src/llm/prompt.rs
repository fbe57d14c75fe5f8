use std::fmt::Write as _;

use base64::Engine as _;

use crate::agent_engine::history::{StepOutcome, StepRecord};
use crate::executor::safety::Verdict;
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl};
use crate::perception::types::Observation;

/// Upper bound on elements rendered into one prompt.
const MAX_ELEMENTS: usize = 80;

/// Upper bound on the actuator detail shown for one step. File reads carry
/// their contents here.
const MAX_DETAIL_CHARS: usize = 4000;

pub const SYSTEM_PROMPT: &str = "You control a desktop computer with mouse, keyboard and file tools \
to accomplish the user's goal one action at a time. After each action you receive a fresh view of \
the screen and the outcome of previous steps.

Rules:
- Propose exactly one action per reply, using the provided tools.
- Coordinates are physical screen pixels, (0, 0) is the top-left corner. Aim for the centre of the target element.
- Prefer mouse navigation over launching programs directly.
- Do not repeat an action that already succeeded unless the screen shows it had no effect.
- A step marked DENIED was refused for lack of permission. Choose a different kind of action or call `blocked`.
- Call `complete` as soon as the goal is visibly achieved, and `blocked` when it cannot be achieved.

If tools are unavailable, end your reply with a JSON object:
```json
{\"action\": \"mouse_click\", \"parameters\": {\"x\": 100, \"y\": 200}, \"reasoning\": \"...\", \"task_complete\": false}
```";

/// Builds the system and user messages for one planning call. Only the last
/// `context_steps` records are rendered.
pub fn build_messages(
    goal: &str,
    observation: &Observation,
    history: &[StepRecord],
    context_steps: usize,
) -> Vec<ChatMessage> {
    let mut text = String::new();
    let _ = writeln!(text, "GOAL: {goal}");
    let (w, h) = observation.scene.resolution;
    let _ = writeln!(text, "Observation #{} | Screen resolution: {w}x{h}", observation.seq);
    if let Some(summary) = &observation.scene.summary {
        let _ = writeln!(text, "Screen summary: {summary}");
    }

    if !observation.scene.elements.is_empty() {
        let _ = writeln!(text, "\nDetected UI elements (centre in pixels):");
        for el in observation.scene.elements.iter().take(MAX_ELEMENTS) {
            let (cx, cy) = el.center_physical(observation.scene.resolution);
            let label = el.content.as_deref().unwrap_or("");
            let _ = writeln!(text, "- [{}] {:?} \"{label}\" at ({cx}, {cy})", el.id, el.node_type);
        }
        if observation.scene.elements.len() > MAX_ELEMENTS {
            let hidden = observation.scene.elements.len() - MAX_ELEMENTS;
            let _ = writeln!(text, "- ... {hidden} more");
        }
    }

    if history.is_empty() {
        let _ = writeln!(text, "\nNo actions taken yet.");
    } else {
        let skip = history.len().saturating_sub(context_steps);
        let _ = writeln!(text, "\nPrevious steps ({} total, most recent last):", history.len());
        for record in &history[skip..] {
            let _ = writeln!(text, "{}", describe_record(record));
        }
    }
    text.push_str("\nDecide the next action.");

    let mut parts = vec![ContentPart::Text { text }];
    if let Some(png) = &observation.scene.screenshot {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url: data_url(png) },
        });
    }

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(parts)]
}

pub fn describe_record(record: &StepRecord) -> String {
    let action = serde_json::to_string(&record.action.kind)
        .unwrap_or_else(|_| record.action.kind.name().to_string());
    let result = match (&record.verdict, &record.outcome) {
        (Verdict::Denied { missing }, _) => {
            let missing: Vec<&str> = missing.iter().map(|c| c.tag()).collect();
            format!("DENIED (missing permission: {})", missing.join(", "))
        }
        (_, StepOutcome::Succeeded { detail }) => format!("ok: {}", indented_detail(detail)),
        (_, StepOutcome::Failed { reason }) => format!("FAILED: {reason}"),
        (_, StepOutcome::Skipped) => "skipped".to_string(),
        (_, StepOutcome::Interrupted) => "interrupted".to_string(),
    };
    format!("{}. {action} -> {result}", record.seq)
}

/// First line inline, the rest indented under the step.
fn indented_detail(detail: &str) -> String {
    let mut capped: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
    if detail.chars().nth(MAX_DETAIL_CHARS).is_some() {
        capped.push_str(" ...");
    }
    let mut lines = capped.lines();
    let mut out = lines.next().unwrap_or("").to_string();
    for line in lines {
        out.push_str("\n    ");
        out.push_str(line);
    }
    out
}

/// Encodes a screenshot as a data URL, sniffing PNG vs JPEG.
pub fn data_url(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "image/jpeg"
    };
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
