use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The task a run is capturing. Fixed for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub start_url: String,
    pub task_id: String,
}

/// What the agent sees before deciding: current URL plus a bounded slice of
/// the page's visible text. Rebuilt every iteration and discarded after the
/// decision is made.
#[derive(Debug, Clone)]
pub struct Observation {
    pub url: String,
    pub visible_text: String,
    pub timestamp: DateTime<Utc>,
}

/// A single atomic action the model asks the agent to perform.
///
/// Parsed strictly from the model's JSON reply: an unknown `action` tag or a
/// missing required field is a parse failure, never coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click {
        target: String,
    },
    Type {
        target: String,
        value: String,
    },
    /// Waits for a fixed duration, or polls for a selector when
    /// `until_selector` is set. Both are clamped to a hard upper bound by
    /// the executor so a run always terminates.
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until_selector: Option<String>,
    },
    Done {
        reason: String,
    },
}

impl Action {
    pub fn is_done(&self) -> bool {
        matches!(self, Action::Done { .. })
    }
}

/// One completed step as replayed to the model in the decision prompt.
/// `action` is None when the step failed before an action existed
/// (unparseable model reply).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One loop iteration, recorded regardless of success or failure.
///
/// `before_screenshot_path` is always present; `after_screenshot_path` is
/// present iff the step did not abort before the after-capture. Screenshot
/// paths are relative to the run directory so a dataset stays valid when
/// moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    pub url_before: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub before_screenshot_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppedReason {
    Completed,
    MaxStepsReached,
    FatalError,
}

/// Whether an unparseable model decision ends the run or is recorded as a
/// per-step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionErrorPolicy {
    #[default]
    Tolerant,
    Strict,
}

/// Everything one run produced. Finalized and written exactly once at loop
/// termination, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub task: Task,
    pub steps: Vec<StepRecord>,
    pub stopped_reason: StoppedReason,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_click_action() {
        let action: Action =
            serde_json::from_str(r#"{"action":"click","target":"Submit new issue"}"#).unwrap();
        assert_eq!(
            action,
            Action::Click {
                target: "Submit new issue".to_string()
            }
        );
    }

    #[test]
    fn parses_type_action() {
        let action: Action =
            serde_json::from_str(r#"{"action":"type","target":"Repository name","value":"demo"}"#)
                .unwrap();
        assert_eq!(
            action,
            Action::Type {
                target: "Repository name".to_string(),
                value: "demo".to_string()
            }
        );
    }

    #[test]
    fn parses_both_wait_forms() {
        let fixed: Action = serde_json::from_str(r#"{"action":"wait","wait_ms":800}"#).unwrap();
        assert_eq!(
            fixed,
            Action::Wait {
                wait_ms: Some(800),
                until_selector: None
            }
        );

        let poll: Action =
            serde_json::from_str(r##"{"action":"wait","until_selector":"#results"}"##).unwrap();
        assert_eq!(
            poll,
            Action::Wait {
                wait_ms: None,
                until_selector: Some("#results".to_string())
            }
        );
    }

    #[test]
    fn rejects_unknown_action_tag() {
        let err = serde_json::from_str::<Action>(r#"{"action":"scroll","target":"body"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn rejects_missing_required_field() {
        assert!(serde_json::from_str::<Action>(r#"{"action":"type","target":"Search"}"#).is_err());
        assert!(serde_json::from_str::<Action>(r#"{"action":"done"}"#).is_err());
    }

    #[test]
    fn stopped_reason_uses_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&StoppedReason::MaxStepsReached).unwrap(),
            "\"max_steps_reached\""
        );
        let parsed: StoppedReason = serde_json::from_str("\"fatal_error\"").unwrap();
        assert_eq!(parsed, StoppedReason::FatalError);
    }

    #[test]
    fn step_record_omits_absent_optionals() {
        let record = StepRecord {
            step_index: 1,
            url_before: "https://example.com".to_string(),
            url_after: None,
            action: Some(Action::Done {
                reason: "finished".to_string(),
            }),
            before_screenshot_path: "step_01_before.png".to_string(),
            after_screenshot_path: None,
            error: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("after_screenshot_path"));
        assert!(!json.contains("url_after"));
        assert!(!json.contains("error"));
    }
}
