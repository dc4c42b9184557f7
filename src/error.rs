use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Failure taxonomy of the orchestration core.
///
/// `ElementNotFound` is recovered locally by skipping the action.
/// `ScrollExhausted` forces the affected session terminal but the run
/// continues. `DecisionService` and `MalformedDecision` are fatal for the
/// whole tick: no session in the batch advances.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("scroll exhausted in session {session} while targeting {action}")]
    ScrollExhausted { session: String, action: String },

    #[error("decision service failure: {0}")]
    DecisionService(String),

    #[error("malformed decision: {0}")]
    MalformedDecision(String),

    #[error("trace log failure: {0}")]
    Trace(#[from] std::io::Error),

    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}
