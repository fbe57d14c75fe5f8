use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::action::Proposal;
use crate::agent_engine::history::StepRecord;
use crate::config::PlannerConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::prompt::build_messages;
use crate::llm::provider::PlannerPort;
use crate::llm::tools::{load_planner_tools, proposal_from_text, proposal_from_tool_call};
use crate::llm::types::{ChatMessage, ChatReply, FunctionCall, ToolCall, ToolDef};
use crate::perception::types::Observation;

/// Environment variable holding the planner API key. Overrides the config file.
pub const API_KEY_ENV: &str = "DESKPILOT_PLANNER_API_KEY";

/// Planner backed by any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI, Ollama, vLLM, ...). Requests are non-streaming.
pub struct ChatPlanner {
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    context_steps: usize,
    tools: Vec<ToolDef>,
    client: reqwest::Client,
}

impl ChatPlanner {
    pub fn from_config(cfg: &PlannerConfig) -> PilotResult<Self> {
        let api_key = resolve_api_key(cfg.api_key.as_deref(), std::env::var(API_KEY_ENV).ok());
        if cfg.model.is_empty() {
            return Err(PilotError::Config("planner.model is not set".into()));
        }
        tracing::info!(
            api_base = %cfg.api_base,
            model = %cfg.model,
            has_key = api_key.is_some(),
            "chat planner configured"
        );
        Ok(Self {
            api_base: cfg.api_base.clone(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            context_steps: cfg.context_steps,
            tools: load_planner_tools()?,
            client: reqwest::Client::new(),
        })
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> PilotResult<ChatReply> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": &messages,
            "stream": false,
            "temperature": self.temperature,
        });
        if !self.tools.is_empty() {
            body["tools"] = serde_json::to_value(&self.tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(model = %self.model, messages = messages.len(), "sending planner request");
        tracing::trace!(body = %sanitized(&body), "request body (base64 omitted)");

        let mut request = self.client.post(&self.api_base).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Planner(format!("{}: {}", status, err_body)));
        }

        let json: serde_json::Value = response.json().await?;
        let reply = parse_reply(&json);
        tracing::info!(
            content_len = reply.content.len(),
            tool_calls = reply.tool_calls.len(),
            tools = ?reply
                .tool_calls
                .iter()
                .map(|tc| tc.function.name.as_str())
                .collect::<Vec<_>>(),
            "planner response received"
        );
        Ok(reply)
    }
}

#[async_trait]
impl PlannerPort for ChatPlanner {
    async fn propose(
        &self,
        goal: &str,
        observation: &Observation,
        history: &[StepRecord],
        cancel: &CancellationToken,
    ) -> PilotResult<Proposal> {
        let messages = build_messages(goal, observation, history, self.context_steps);
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(PilotError::Cancelled),
            reply = self.chat(messages) => reply?,
        };

        if let Some(call) = reply.tool_calls.first() {
            if reply.tool_calls.len() > 1 {
                tracing::debug!(
                    ignored = reply.tool_calls.len() - 1,
                    "only the first tool call is used"
                );
            }
            return proposal_from_tool_call(call);
        }
        proposal_from_text(&reply.content)
    }
}

/// The env value wins over the configured key; blank values count as unset.
fn resolve_api_key(configured: Option<&str>, env: Option<String>) -> Option<String> {
    env.filter(|k| !k.trim().is_empty())
        .or_else(|| configured.map(str::to_owned).filter(|k| !k.trim().is_empty()))
}

fn parse_reply(json: &serde_json::Value) -> ChatReply {
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    ChatReply { content, tool_calls }
}

/// Replaces image payloads so request bodies can be logged.
fn sanitized(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
