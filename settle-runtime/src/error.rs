//! Error types for the settle runtime

use thiserror::Error;

/// Errors surfaced by an [`Evaluation`](crate::Evaluation)
#[derive(Debug, Error)]
pub enum EvalError {
    /// The evaluation was closed; nothing may run on it again
    #[error("Evaluation is closed")]
    Closed,

    /// A fixpoint did not settle within the round cap
    #[error("Fixpoint did not settle after {rounds} rounds")]
    Diverged { rounds: usize },

    /// A previous divergence left the evaluation unusable
    #[error("Evaluation is poisoned by an earlier divergence")]
    Poisoned,

    /// The database registry was mutated while a round was running
    #[error("Cannot {0} while a fixpoint round is in progress")]
    RoundInProgress(&'static str),

    #[error("Database {0} is not registered")]
    UnknownDatabase(String),

    #[error("Database {0} is already registered")]
    DuplicateDatabase(String),

    /// A saved state could not be encoded or decoded
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl EvalError {
    /// Short machine-readable name, used as the `kind` of wire errors
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Closed => "closed",
            EvalError::Diverged { .. } => "diverged",
            EvalError::Poisoned => "poisoned",
            EvalError::RoundInProgress(_) => "round_in_progress",
            EvalError::UnknownDatabase(_) => "unknown_database",
            EvalError::DuplicateDatabase(_) => "duplicate_database",
            EvalError::Snapshot(_) => "snapshot",
        }
    }
}

/// Result type using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;
