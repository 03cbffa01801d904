/// Error types for the debug bridge.
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for bridge, target and session operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Debugger setup failed: {0}")]
    SetupFailed(String),

    #[error("Interpreter command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Source path is not absolute: {0}")]
    RelativePath(PathBuf),

    #[error("Breakpoint resolution failed: {0}")]
    BreakpointResolution(String),

    #[error("Cannot {action} while target is {state}")]
    InvalidState { action: String, state: String },

    #[error("Event processor failed: {0}")]
    ProcessorFailed(String),

    #[error("Dispatcher error: {0}")]
    DispatcherError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    /// Builds a `CommandFailed` error for a native interpreter call.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that make the whole session unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::SetupFailed(_))
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
