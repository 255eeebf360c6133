use std::sync::Arc;

use tracing::warn;

use crate::error::AgentError;
use crate::session::Session;
use crate::types::Action;

/// Fallback settle duration for a `wait` that names neither a duration nor
/// a selector.
const DEFAULT_WAIT_MS: u64 = 800;

/// Hard bounds on browser-side blocking, taken from config.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionBounds {
    /// Upper bound for `wait` durations and selector polls.
    pub wait_cap_ms: u64,
    /// Settle delay after a successful click/type, before the
    /// after-screenshot.
    pub settle_delay_ms: u64,
}

/// Outcome of applying one action. Per-step failures land here as
/// `success = false`; they never panic the loop or tear down the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// Apply one action against the live session. `done` touches nothing and
/// always succeeds; everything else runs on the blocking pool, the way the
/// browser side expects.
pub async fn execute(
    session: Arc<dyn Session>,
    action: Action,
    bounds: ExecutionBounds,
) -> ExecutionResult {
    if action.is_done() {
        return ExecutionResult::ok();
    }

    let outcome =
        tokio::task::spawn_blocking(move || run_blocking(session.as_ref(), &action, bounds)).await;

    match outcome {
        Ok(Ok(())) => ExecutionResult::ok(),
        Ok(Err(e)) => {
            warn!(error = %e, "action failed");
            ExecutionResult::failed(error_label(&e))
        }
        Err(join_err) => ExecutionResult::failed(format!("execution task panicked: {join_err}")),
    }
}

fn run_blocking(
    session: &dyn Session,
    action: &Action,
    bounds: ExecutionBounds,
) -> crate::error::Result<()> {
    match action {
        Action::Click { target } => {
            session.find_and_click(target)?;
            session.wait_millis(bounds.settle_delay_ms);
        }
        Action::Type { target, value } => {
            session.find_and_fill(target, value)?;
            session.wait_millis(bounds.settle_delay_ms);
        }
        Action::Wait {
            wait_ms,
            until_selector,
        } => match until_selector {
            Some(selector) => {
                let timeout = wait_ms.unwrap_or(bounds.wait_cap_ms).min(bounds.wait_cap_ms);
                session.wait_for_selector(selector, timeout)?;
            }
            None => {
                let duration = wait_ms.unwrap_or(DEFAULT_WAIT_MS).min(bounds.wait_cap_ms);
                session.wait_millis(duration);
            }
        },
        Action::Done { .. } => {}
    }
    Ok(())
}

/// Taxonomy label first, detail after, so downstream consumers can classify
/// recorded failures without parsing prose.
fn error_label(error: &AgentError) -> String {
    match error {
        AgentError::TargetNotFound(target) => format!("TargetNotFound: {target}"),
        AgentError::ActionTimeout(detail) => format!("ActionTimeout: {detail}"),
        AgentError::SessionUnavailable(detail) => format!("SessionUnavailable: {detail}"),
        other => other.to_string(),
    }
}
