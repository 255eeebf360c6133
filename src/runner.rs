use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::brain::Decider;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::executor::{ExecutionBounds, execute};
use crate::observer;
use crate::recorder::RunRecorder;
use crate::session::Session;
use crate::types::{
    DecisionErrorPolicy, HistoryEntry, RunMetadata, StepRecord, StoppedReason, Task,
};

/// Loop controller. Owns one run: navigate to the start URL, then
/// observe → decide → execute → capture until the model says done, the step
/// budget runs out, a fatal error hits, or the run is cancelled.
///
/// Everything is sequential: one session, one outstanding model request,
/// one in-flight browser action. Step records are appended in execution
/// order and finalized exactly once.
pub struct Runner {
    config: AgentConfig,
    session: Arc<dyn Session>,
    decider: Arc<dyn Decider>,
}

impl Runner {
    pub fn new(config: AgentConfig, session: Arc<dyn Session>, decider: Arc<dyn Decider>) -> Self {
        Self {
            config,
            session,
            decider,
        }
    }

    /// Drive one task to a terminal state. The returned metadata has
    /// already been finalized to disk; `Err` means the run directory or
    /// the metadata artifact itself could not be written.
    pub async fn run(&self, task: Task, cancel: watch::Receiver<bool>) -> Result<RunMetadata> {
        let start_time = Utc::now();
        let recorder = RunRecorder::create(&self.config.dataset_root, &task, start_time)?;

        let mut steps = Vec::new();
        let stopped_reason = self.drive(&task, &recorder, &mut steps, &cancel).await;
        self.session.close();

        let run = RunMetadata {
            task,
            steps,
            stopped_reason,
            start_time,
            end_time: Utc::now(),
        };
        recorder.finalize(&run)?;
        info!(
            stopped_reason = ?run.stopped_reason,
            steps = run.steps.len(),
            run_dir = %recorder.run_dir().display(),
            "run finished"
        );
        Ok(run)
    }

    async fn drive(
        &self,
        task: &Task,
        recorder: &RunRecorder,
        steps: &mut Vec<StepRecord>,
        cancel: &watch::Receiver<bool>,
    ) -> StoppedReason {
        let start_url = task.start_url.clone();
        if let Err(e) = self
            .on_session(move |session| session.navigate(&start_url))
            .await
        {
            error!(error = %e, "could not reach the start URL");
            return StoppedReason::FatalError;
        }

        let bounds = ExecutionBounds {
            wait_cap_ms: self.config.wait_cap_ms,
            settle_delay_ms: self.config.settle_delay_ms,
        };
        let mut history: Vec<HistoryEntry> = Vec::new();

        for step_index in 1..=self.config.max_steps {
            if *cancel.borrow() {
                warn!(step_index, "run cancelled");
                return StoppedReason::FatalError;
            }

            // OBSERVING
            let char_limit = self.config.text_char_limit;
            let observation = match self
                .on_session(move |session| observer::observe(session, char_limit))
                .await
            {
                Ok(observation) => observation,
                Err(e) => {
                    error!(step_index, error = %e, "observation failed");
                    return StoppedReason::FatalError;
                }
            };

            // Before-screenshot first: every step record carries one, even
            // when the decision or the action fails afterwards.
            let before_screenshot_path = {
                let rec = recorder.clone();
                match self
                    .on_session(move |session| rec.capture_before(session, step_index))
                    .await
                {
                    Ok(path) => path,
                    Err(e) => {
                        error!(step_index, error = %e, "before-screenshot failed");
                        return StoppedReason::FatalError;
                    }
                }
            };

            // DECIDING
            let decision = self.decider.decide(task, &observation, &history).await;
            if *cancel.borrow() {
                warn!(step_index, "run cancelled");
                return StoppedReason::FatalError;
            }
            let action = match decision {
                Ok(action) => action,
                Err(e) => {
                    let error_text = decision_error_text(&e);
                    warn!(step_index, error = %error_text, "decision failed");
                    steps.push(StepRecord {
                        step_index,
                        url_before: observation.url.clone(),
                        url_after: None,
                        action: None,
                        before_screenshot_path,
                        after_screenshot_path: None,
                        error: Some(error_text.clone()),
                        timestamp: Utc::now(),
                    });
                    self.push_history(
                        &mut history,
                        HistoryEntry {
                            action: None,
                            error: Some(error_text),
                        },
                    );
                    match self.config.decision_error_policy {
                        DecisionErrorPolicy::Strict => return StoppedReason::FatalError,
                        DecisionErrorPolicy::Tolerant => continue,
                    }
                }
            };
            info!(step_index, ?action, "executing");

            // EXECUTING
            let result = execute(self.session.clone(), action.clone(), bounds).await;

            // CAPTURING
            let after_screenshot_path = {
                let rec = recorder.clone();
                match self
                    .on_session(move |session| rec.capture_after(session, step_index))
                    .await
                {
                    Ok(path) => Some(path),
                    Err(capture_err) => {
                        // The step still gets recorded; the missing
                        // after-screenshot marks the abort.
                        let merged = match &result.error {
                            Some(exec_err) => format!("{exec_err}; {capture_err}"),
                            None => capture_err.to_string(),
                        };
                        error!(step_index, error = %merged, "after-screenshot failed");
                        steps.push(StepRecord {
                            step_index,
                            url_before: observation.url.clone(),
                            url_after: None,
                            action: Some(action),
                            before_screenshot_path,
                            after_screenshot_path: None,
                            error: Some(merged),
                            timestamp: Utc::now(),
                        });
                        return StoppedReason::FatalError;
                    }
                }
            };
            let url_after = self
                .on_session(|session| session.current_url())
                .await
                .ok();

            steps.push(StepRecord {
                step_index,
                url_before: observation.url.clone(),
                url_after,
                action: Some(action.clone()),
                before_screenshot_path,
                after_screenshot_path,
                error: result.error.clone(),
                timestamp: Utc::now(),
            });
            self.push_history(
                &mut history,
                HistoryEntry {
                    action: Some(action.clone()),
                    error: result.error,
                },
            );

            if action.is_done() {
                return StoppedReason::Completed;
            }
        }

        StoppedReason::MaxStepsReached
    }

    /// Browser calls block, so they run on the blocking pool, the session
    /// handle cloned into the task.
    async fn on_session<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Session) -> Result<T> + Send + 'static,
    {
        let session = self.session.clone();
        match tokio::task::spawn_blocking(move || f(session.as_ref())).await {
            Ok(result) => result,
            Err(e) => Err(AgentError::SessionUnavailable(format!(
                "browser task failed: {e}"
            ))),
        }
    }

    fn push_history(&self, history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
        history.push(entry);
        let window = self.config.history_window;
        if history.len() > window {
            let excess = history.len() - window;
            history.drain(..excess);
        }
    }
}

/// Taxonomy label plus the raw model output, preserved verbatim for
/// post-hoc debugging.
fn decision_error_text(error: &AgentError) -> String {
    match error {
        AgentError::DecisionParse { message, raw } => {
            format!("DecisionParseError: {message}; raw model output: {raw}")
        }
        other => other.to_string(),
    }
}
