use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::DecisionErrorPolicy;

/// Immutable run configuration, threaded explicitly through construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model name sent to the completion endpoint.
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Root directory holding one subdirectory per run.
    #[serde(default = "default_dataset_root")]
    pub dataset_root: PathBuf,
    /// Step budget per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// How much visible page text goes into the decision prompt.
    #[serde(default = "default_text_char_limit")]
    pub text_char_limit: usize,
    /// How many past actions the decision prompt replays.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    /// Hard upper bound for `wait` actions and selector polls.
    #[serde(default = "default_wait_cap_ms")]
    pub wait_cap_ms: u64,
    /// Settle delay after each executed action, before the after-screenshot.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub decision_error_policy: DecisionErrorPolicy,
    #[serde(default)]
    pub headless: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_max_steps() -> usize {
    15
}

fn default_text_char_limit() -> usize {
    6000
}

fn default_history_window() -> usize {
    3
}

fn default_model_timeout_ms() -> u64 {
    60_000
}

fn default_wait_cap_ms() -> u64 {
    10_000
}

fn default_settle_delay_ms() -> u64 {
    600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base: default_api_base(),
            api_key: String::new(),
            dataset_root: default_dataset_root(),
            max_steps: default_max_steps(),
            text_char_limit: default_text_char_limit(),
            history_window: default_history_window(),
            model_timeout_ms: default_model_timeout_ms(),
            wait_cap_ms: default_wait_cap_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            decision_error_policy: DecisionErrorPolicy::default(),
            headless: false,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by environment variables. `UISCRIBE_API_KEY`
    /// wins over `OPENAI_API_KEY`; CLI flags are applied on top by the
    /// caller.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(key) =
            std::env::var("UISCRIBE_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
        {
            cfg.api_key = key;
        }
        if let Ok(model) = std::env::var("UISCRIBE_MODEL") {
            cfg.model = model;
        }
        if let Ok(base) = std::env::var("UISCRIBE_API_BASE") {
            cfg.api_base = base;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_all_fields_defaulted() {
        let cfg: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_steps, 15);
        assert_eq!(cfg.text_char_limit, 6000);
        assert_eq!(cfg.history_window, 3);
        assert_eq!(cfg.decision_error_policy, DecisionErrorPolicy::Tolerant);
        assert!(!cfg.headless);
    }

    #[test]
    fn api_key_never_serialized() {
        let cfg = AgentConfig {
            api_key: "secret".to_string(),
            ..AgentConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }
}
