use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::types::{Action, HistoryEntry, Observation, Task};

const SYSTEM_PROMPT: &str = r##"You are a browser automation agent capturing UI-state datasets. You control a real browser by issuing ONE action at a time as JSON.

Available actions:
- {"action":"click","target":"Submit new issue"}
- {"action":"type","target":"Repository name","value":"my-repo"}
- {"action":"wait","wait_ms":800}
- {"action":"wait","until_selector":"#results"}
- {"action":"done","reason":"Issue created and visible"}

Rules:
1. Return ONLY a single JSON object. No markdown, no explanation.
2. "target" describes the element app-agnostically: a button/link/tab name, an input label or placeholder, visible text, or a CSS selector.
3. Keep each step small: one click OR one type OR a short wait.
4. If the last action reported an error, try a different target or approach.
5. When the task is visibly accomplished, use done with a short reason."##;

/// Language-model boundary: one synchronous request/response with a timeout.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Reqwest client against an OpenAI-compatible chat/completions endpoint.
pub struct OpenAiModel {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::Llm(
                "no API key set (UISCRIBE_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.model_timeout_ms))
            .build()
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.2,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Llm(format!("model request timed out: {e}"))
                } else {
                    AgentError::Llm(e.to_string())
                }
            })?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown API error");
            return Err(AgentError::Llm(format!("API error ({status}): {message}")));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AgentError::Llm(format!("no content in model response: {body}")))
    }
}

/// Action decider. Stateless across calls; the history window is supplied
/// by the loop and capped again here so the prompt stays bounded no matter
/// how long a run gets.
pub struct Brain {
    model: Arc<dyn LanguageModel>,
    history_window: usize,
}

/// Seam the loop controller drives; lets tests script decisions.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(
        &self,
        task: &Task,
        observation: &Observation,
        history: &[HistoryEntry],
    ) -> Result<Action>;
}

impl Brain {
    pub fn new(model: Arc<dyn LanguageModel>, history_window: usize) -> Self {
        Self {
            model,
            history_window,
        }
    }
}

#[async_trait]
impl Decider for Brain {
    async fn decide(
        &self,
        task: &Task,
        observation: &Observation,
        history: &[HistoryEntry],
    ) -> Result<Action> {
        let prompt = build_prompt(task, observation, history, self.history_window);
        let raw = self.model.complete(&prompt).await?;
        debug!(%raw, "model replied");
        parse_action(&raw)
    }
}

fn build_prompt(
    task: &Task,
    observation: &Observation,
    history: &[HistoryEntry],
    window: usize,
) -> String {
    let tail = &history[history.len().saturating_sub(window)..];
    let recent = if tail.is_empty() {
        "None".to_string()
    } else {
        tail.iter()
            .map(|entry| serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{SYSTEM_PROMPT}\n\nTask: {}\n\nCurrent URL:\n{}\n\nVisible text (partial):\n{}\n\nRecent actions:\n{}\n\nOutput the next action as JSON only, no extra text.",
        task.description, observation.url, observation.visible_text, recent
    )
}

/// Strict parse of the model reply. Markdown code fences are tolerated, but
/// an unknown action tag or a missing field is an error carrying the raw
/// output verbatim for the step record.
pub fn parse_action(raw: &str) -> Result<Action> {
    let cleaned = strip_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| AgentError::DecisionParse {
        message: e.to_string(),
        raw: raw.to_string(),
    })
}

fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
