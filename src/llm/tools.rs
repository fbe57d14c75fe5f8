use regex::Regex;
use serde_json::{Map, Value};

use crate::agent_engine::action::{Action, ActionKind, MouseButton, Proposal};
use crate::errors::{PilotError, PilotResult};
use crate::llm::types::{ToolCall, ToolDef};

/// Loads the planner tool definitions from prompts/tools/desktop.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_planner_tools() -> PilotResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/desktop.json");
    serde_json::from_str(json)
        .map_err(|e| PilotError::Config(format!("Failed to parse planner tools: {e}")))
}

pub fn proposal_from_tool_call(call: &ToolCall) -> PilotResult<Proposal> {
    let name = call.function.name.as_str();
    let args = if call.function.arguments.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(&call.function.arguments)
            .map_err(|e| PilotError::Planner(format!("invalid arguments for {name}: {e}")))?
    };
    let reasoning = args.get("reasoning").and_then(Value::as_str).map(str::to_owned);
    proposal_from_parts(name, &args, reasoning)
}

/// Parses a free-text reply that ends with a JSON object of the form
/// `{"action": ..., "parameters": {...}, "reasoning": ..., "task_complete": bool}`.
pub fn proposal_from_text(text: &str) -> PilotResult<Proposal> {
    let json = extract_json(text)
        .ok_or_else(|| PilotError::Planner("reply contains no JSON object".into()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| PilotError::Planner(format!("reply JSON is malformed: {e}")))?;
    let reasoning = value.get("reasoning").and_then(Value::as_str).map(str::to_owned);

    if value.get("task_complete").and_then(Value::as_bool) == Some(true) {
        let summary = reasoning
            .or_else(|| value.get("observation").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| "task complete".into());
        return Ok(Proposal::Done { summary });
    }

    let name = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| PilotError::Planner("reply JSON has no action".into()))?;
    let params = value.get("parameters").cloned().unwrap_or_else(|| Value::Object(Map::new()));
    proposal_from_parts(name, &params, reasoning)
}

/// Returns the JSON object in `text`: a ```json fenced block if present,
/// otherwise the first balanced `{...}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(fenced) = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
    {
        return Some(fenced.as_str());
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn proposal_from_parts(
    name: &str,
    params: &Value,
    reasoning: Option<String>,
) -> PilotResult<Proposal> {
    let kind = match name {
        "complete" | "done" => {
            let summary = string_param(params, "summary")
                .or(reasoning)
                .unwrap_or_else(|| "task complete".into());
            return Ok(Proposal::Done { summary });
        }
        "blocked" => {
            let reason = string_param(params, "reason")
                .or(reasoning)
                .unwrap_or_else(|| "planner gave no reason".into());
            return Ok(Proposal::Blocked { reason });
        }
        "mouse_click" | "click" => ActionKind::PointerClick {
            x: int_param(name, params, "x")?,
            y: int_param(name, params, "y")?,
            button: button_param(params),
        },
        "right_click" => ActionKind::PointerClick {
            x: int_param(name, params, "x")?,
            y: int_param(name, params, "y")?,
            button: MouseButton::Right,
        },
        "double_click" => ActionKind::PointerDoubleClick {
            x: int_param(name, params, "x")?,
            y: int_param(name, params, "y")?,
        },
        "mouse_move" => ActionKind::PointerMove {
            x: int_param(name, params, "x")?,
            y: int_param(name, params, "y")?,
        },
        "scroll" => ActionKind::PointerScroll { amount: int_param(name, params, "amount")? },
        "keyboard_type" | "type_text" => {
            ActionKind::KeyType { text: required_string(name, params, "text")? }
        }
        "key_press" => ActionKind::KeyPress { key: required_string(name, params, "key")? },
        "hotkey" => ActionKind::KeyCombo { keys: string_list(params, "keys") },
        "escape" => ActionKind::KeyPress { key: "escape".into() },
        "alt_tab" => shortcut(&["alt", "tab"]),
        "ctrl_n" => shortcut(&["ctrl", "n"]),
        "select_all" => shortcut(&["ctrl", "a"]),
        "save_file" => shortcut(&["ctrl", "s"]),
        "read_file" => ActionKind::FileRead { path: required_string(name, params, "path")? },
        "write_file" => ActionKind::FileWrite {
            path: required_string(name, params, "path")?,
            contents: required_string(name, params, "contents")?,
        },
        "open_app" | "launch" => ActionKind::LaunchProcess {
            program: string_param(params, "app")
                .or_else(|| string_param(params, "program"))
                .ok_or_else(|| missing(name, "app"))?,
            args: string_list(params, "args"),
        },
        "wait" => ActionKind::Wait { millis: wait_millis(params) },
        other => {
            tracing::warn!(action = %other, "planner proposed an unrecognized action");
            ActionKind::Unknown { name: other.to_string() }
        }
    };

    let action = match reasoning {
        Some(r) => Action::new(kind).with_reasoning(r),
        None => Action::new(kind),
    };
    Ok(Proposal::Act { action })
}

fn shortcut(keys: &[&str]) -> ActionKind {
    ActionKind::KeyCombo { keys: keys.iter().map(|k| k.to_string()).collect() }
}

fn missing(action: &str, field: &str) -> PilotError {
    PilotError::Planner(format!("{action} is missing parameter '{field}'"))
}

fn int_param(action: &str, params: &Value, field: &str) -> PilotResult<i32> {
    let value = params.get(field).ok_or_else(|| missing(action, field))?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| PilotError::Planner(format!("{action}: '{field}' is not an integer")))
}

fn string_param(params: &Value, field: &str) -> Option<String> {
    params.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn required_string(action: &str, params: &Value, field: &str) -> PilotResult<String> {
    string_param(params, field).ok_or_else(|| missing(action, field))
}

fn string_list(params: &Value, field: &str) -> Vec<String> {
    params
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default()
}

fn button_param(params: &Value) -> MouseButton {
    match params.get("button").and_then(Value::as_str) {
        Some("right") => MouseButton::Right,
        Some("middle") => MouseButton::Middle,
        _ => MouseButton::Left,
    }
}

fn wait_millis(params: &Value) -> u64 {
    if let Some(ms) = params.get("millis").and_then(Value::as_u64) {
        return ms;
    }
    let seconds = params.get("seconds").and_then(Value::as_f64).unwrap_or(1.0);
    (seconds.max(0.0) * 1000.0).round() as u64
}
