//! Runner and stage error types

use crate::pipeline::expressions::ExpressionError;

/// Errors surfaced to the caller of a run
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Pipeline '{0}' has no stages")]
    EmptyPipeline(String),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
}

/// Errors raised while turning a definition into an executable pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Pipeline '{0}' has no stages")]
    NoStages(String),

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Stage '{0}' has no steps")]
    NoSteps(String),

    #[error("Stage '{stage}': {message}")]
    InvalidStep { stage: String, message: String },

    #[error("Stage '{stage}': invalid gate: {message}")]
    InvalidGate { stage: String, message: String },
}

/// Errors raised while evaluating a stage gate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Missing environment value: {0}")]
    MissingKey(String),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Invalid branch pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors a stage action or hook can report
///
/// The runner converts every one of them into a stage outcome; none of them
/// crosses a stage boundary.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    ActionFailed(String),

    #[error("Command `{command}` exited with code {exit_code}{}", stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline deadline exceeded")]
    TimeoutExceeded,

    #[error("Stage action panicked: {0}")]
    Panicked(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message() {
        let err = StageError::CommandFailed {
            command: "mvn test".to_string(),
            exit_code: 1,
            stderr: "BUILD FAILURE\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `mvn test` exited with code 1: BUILD FAILURE"
        );

        let err = StageError::CommandFailed {
            command: "false".to_string(),
            exit_code: 1,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Command `false` exited with code 1");
    }

    #[test]
    fn test_gate_error_conversion() {
        let err: StageError = GateError::MissingKey("BRANCH_NAME".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Gate error: Missing environment value: BRANCH_NAME"
        );
    }
}
