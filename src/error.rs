use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The browser session is gone (crash, disconnect). Always fatal.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// The model reply could not be parsed into an action. `raw` keeps the
    /// model output verbatim so it can be recorded in the step's error field.
    #[error("could not parse model decision: {message}")]
    DecisionParse { message: String, raw: String },

    /// No element matched the target descriptor within the bounded search.
    #[error("no element matched target: {0}")]
    TargetNotFound(String),

    /// A browser operation exceeded its configured wait bound.
    #[error("browser action timed out: {0}")]
    ActionTimeout(String),

    /// A screenshot or metadata artifact could not be persisted. Fatal,
    /// since dataset integrity cannot be guaranteed past this point.
    #[error("artifact write failed: {0}")]
    ArtifactWrite(String),

    /// Model request transport failure (network, timeout, API error).
    #[error("language model request failed: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
