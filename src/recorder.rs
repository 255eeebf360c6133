use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::session::Session;
use crate::types::{RunMetadata, Task};

/// Persists one run's artifacts: before/after screenshots per step and a
/// single `metadata.json` written at finalize. The run directory name is
/// `<task_id>_<timestamp>`, which keeps concurrent runs under the same
/// dataset root from colliding.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    run_dir: PathBuf,
}

impl RunRecorder {
    pub fn create(dataset_root: &Path, task: &Task, started: DateTime<Utc>) -> Result<Self> {
        let run_dir = dataset_root.join(format!(
            "{}_{}",
            task.task_id,
            started.format("%Y%m%dT%H%M%SZ")
        ));
        fs::create_dir_all(&run_dir).map_err(|e| {
            AgentError::ArtifactWrite(format!("could not create {}: {e}", run_dir.display()))
        })?;
        info!(run_dir = %run_dir.display(), "run directory ready");

        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn capture_before(&self, session: &dyn Session, step_index: usize) -> Result<String> {
        self.capture(session, step_index, "before")
    }

    pub fn capture_after(&self, session: &dyn Session, step_index: usize) -> Result<String> {
        self.capture(session, step_index, "after")
    }

    /// Returns the file name, relative to the run directory, for the step
    /// record.
    fn capture(&self, session: &dyn Session, step_index: usize, suffix: &str) -> Result<String> {
        let name = format!("step_{step_index:02}_{suffix}.png");
        let bytes = session.screenshot()?;
        fs::write(self.run_dir.join(&name), bytes)
            .map_err(|e| AgentError::ArtifactWrite(format!("{name}: {e}")))?;
        debug!(%name, "screenshot saved");
        Ok(name)
    }

    /// Write `metadata.json` exactly once, via temp file + rename so a
    /// reader never sees a half-written file.
    pub fn finalize(&self, run: &RunMetadata) -> Result<PathBuf> {
        let final_path = self.run_dir.join("metadata.json");
        let tmp_path = self.run_dir.join("metadata.json.tmp");

        let json = serde_json::to_vec_pretty(run)
            .map_err(|e| AgentError::ArtifactWrite(format!("metadata serialization: {e}")))?;
        fs::write(&tmp_path, json)
            .map_err(|e| AgentError::ArtifactWrite(format!("metadata write: {e}")))?;
        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            AgentError::ArtifactWrite(format!("metadata rename: {e}"))
        })?;

        info!(path = %final_path.display(), steps = run.steps.len(), "run metadata finalized");
        Ok(final_path)
    }
}

/// Lowercase alphanumerics, everything else mapped to '-', then trimmed.
/// Used to derive a task id from the description when none is supplied.
pub fn slugify(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, StepRecord, StoppedReason};
    use std::sync::Mutex;

    struct FakeSession {
        shots: Mutex<u8>,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                shots: Mutex::new(0),
            }
        }
    }

    impl Session for FakeSession {
        fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        fn find_and_click(&self, _descriptor: &str) -> Result<()> {
            Ok(())
        }
        fn find_and_fill(&self, _descriptor: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        fn wait_millis(&self, _ms: u64) {}
        fn wait_for_selector(&self, _selector: &str, _timeout_ms: u64) -> Result<()> {
            Ok(())
        }
        fn screenshot(&self) -> Result<Vec<u8>> {
            let mut shots = self.shots.lock().unwrap();
            *shots += 1;
            Ok(vec![*shots; 4])
        }
        fn current_url(&self) -> Result<String> {
            Ok("https://example.test".to_string())
        }
        fn visible_text(&self) -> Result<String> {
            Ok(String::new())
        }
        fn close(&self) {}
    }

    fn task() -> Task {
        Task {
            description: "Create a repo in GitHub".to_string(),
            start_url: "https://github.com/new".to_string(),
            task_id: "create-repo".to_string(),
        }
    }

    #[test]
    fn run_dir_is_task_scoped_and_timestamped() {
        let root = tempfile::tempdir().unwrap();
        let started = "2026-08-23T10:30:00Z".parse().unwrap();
        let recorder = RunRecorder::create(root.path(), &task(), started).unwrap();

        assert_eq!(
            recorder.run_dir(),
            root.path().join("create-repo_20260823T103000Z")
        );
        assert!(recorder.run_dir().is_dir());
    }

    #[test]
    fn screenshots_use_zero_padded_step_names() {
        let root = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(root.path(), &task(), Utc::now()).unwrap();
        let session = FakeSession::new();

        let before = recorder.capture_before(&session, 1).unwrap();
        let after = recorder.capture_after(&session, 1).unwrap();
        let later = recorder.capture_before(&session, 12).unwrap();

        assert_eq!(before, "step_01_before.png");
        assert_eq!(after, "step_01_after.png");
        assert_eq!(later, "step_12_before.png");
        assert!(recorder.run_dir().join("step_01_before.png").is_file());
        assert!(recorder.run_dir().join("step_01_after.png").is_file());
    }

    #[test]
    fn finalize_round_trips_and_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let recorder = RunRecorder::create(root.path(), &task(), Utc::now()).unwrap();
        let run = RunMetadata {
            task: task(),
            steps: vec![StepRecord {
                step_index: 1,
                url_before: "https://github.com/new".to_string(),
                url_after: Some("https://github.com/demo".to_string()),
                action: Some(Action::Click {
                    target: "Create repository".to_string(),
                }),
                before_screenshot_path: "step_01_before.png".to_string(),
                after_screenshot_path: Some("step_01_after.png".to_string()),
                error: None,
                timestamp: Utc::now(),
            }],
            stopped_reason: StoppedReason::Completed,
            start_time: Utc::now(),
            end_time: Utc::now(),
        };

        let path = recorder.finalize(&run).unwrap();
        assert_eq!(path, recorder.run_dir().join("metadata.json"));
        assert!(!recorder.run_dir().join("metadata.json.tmp").exists());

        let written = fs::read_to_string(&path).unwrap();
        let parsed: RunMetadata = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, run);
    }

    #[test]
    fn slugify_matches_dataset_naming() {
        assert_eq!(slugify("Create a repo in GitHub"), "create-a-repo-in-github");
        assert_eq!(slugify("  spaced  out  "), "spaced--out");
        assert_eq!(slugify("!!!"), "");
    }
}
