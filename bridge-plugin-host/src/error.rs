//! Error types for command dispatch

use thiserror::Error;

/// Errors returned to the invoker of a command
#[derive(Debug, Error)]
pub enum CommandError {
    /// No handler is registered under the name
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The handler ran and failed, synchronously or after resolving
    #[error("Command '{command}' failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// The arguments do not match what the command expects
    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },
}

impl CommandError {
    /// Create a failure for the given command
    pub fn failed(command: impl Into<String>, source: anyhow::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Name of the command this error refers to
    pub fn command(&self) -> &str {
        match self {
            Self::CommandNotFound(command)
            | Self::CommandFailed { command, .. }
            | Self::InvalidArguments { command, .. } => command,
        }
    }

    /// Check if the command was missing rather than failing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CommandNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CommandError::CommandNotFound("items.playItem".into());
        assert_eq!(err.to_string(), "Command not found: items.playItem");
        assert!(err.is_not_found());

        let err = CommandError::failed("x", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "Command 'x' failed: boom");
        assert_eq!(err.command(), "x");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_failure_keeps_source() {
        let err = CommandError::failed("x", anyhow::anyhow!("root cause"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("root cause"));
    }
}
