pub mod brain;
pub mod config;
pub mod error;
pub mod executor;
pub mod observer;
pub mod recorder;
pub mod runner;
pub mod session;
pub mod types;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use runner::Runner;
pub use types::{Action, RunMetadata, StoppedReason, Task};
