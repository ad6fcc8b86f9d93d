//! Error types for stackctl-engine

use thiserror::Error;

/// Errors that can occur while driving the container engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine binary not found
    #[error("{program} is not installed or not in PATH")]
    NotInstalled { program: String },

    /// Engine binary present but the daemon cannot be reached
    #[error("container engine is unreachable: {0}")]
    Unreachable(String),

    /// Neither `docker compose` nor `docker-compose` answered a version query
    #[error("no compose implementation found (tried `{program} compose` and `docker-compose`)")]
    ComposeMissing { program: String },

    /// Engine command ran and exited non-zero
    #[error("`{operation}` failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        operation: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Engine command exceeded its deadline
    #[error("`{operation}` timed out after {timeout_secs} seconds")]
    TimedOut {
        operation: String,
        timeout_secs: u64,
    },

    /// Engine output could not be understood
    #[error("failed to parse engine output: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True when the error means the engine itself is missing or unreachable,
    /// as opposed to a command the engine ran and refused.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            EngineError::NotInstalled { .. }
                | EngineError::Unreachable(_)
                | EngineError::ComposeMissing { .. }
        )
    }

    /// Build a `CommandFailed` from captured process output.
    pub fn command_failed(operation: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        EngineError::CommandFailed {
            operation: operation.into(),
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_classification() {
        assert!(EngineError::NotInstalled {
            program: "docker".to_string()
        }
        .is_environment());
        assert!(EngineError::Unreachable("no socket".to_string()).is_environment());
        assert!(!EngineError::command_failed("compose build", Some(1), "boom").is_environment());
    }

    #[test]
    fn command_failed_trims_stderr() {
        let err = EngineError::command_failed("compose up", Some(2), "  bad image\n");
        assert_eq!(
            err.to_string(),
            "`compose up` failed (exit code Some(2)): bad image"
        );
    }
}
