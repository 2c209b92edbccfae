//! Error types for mediarun-av.

use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while checking or running an external tool.
///
/// The type is `Clone` because a failed readiness check is cached and handed
/// back to every later caller of the same [`ProcessTool`](crate::ProcessTool).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The binary could not be found on the search path.
    #[error("{tool} not found: {message}")]
    ToolNotFound { tool: String, message: String },

    /// The binary exists but its health probe failed or hung.
    #[error("{tool} is not runnable: {message}")]
    ToolUnhealthy { tool: String, message: String },

    /// Pipes could not be set up or the process could not be spawned.
    #[error("failed to launch {tool}: {message}")]
    LaunchFailed { tool: String, message: String },

    /// The run-scoped deadline expired before the process exited.
    #[error("{tool} timed out after {after:?}; stderr={stderr}")]
    Timeout {
        tool: String,
        after: Duration,
        stderr: String,
    },

    /// The process exited with a non-zero status.
    #[error("{tool} failed: {status}; stderr={stderr}")]
    ProcessFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The run was cancelled and the process did not exit cleanly.
    #[error("{tool} run aborted; stderr={stderr}")]
    Aborted { tool: String, stderr: String },

    /// Waiting on the process failed for another reason.
    #[error("{tool} exec error: {message}; stderr={stderr}")]
    Exec {
        tool: String,
        message: String,
        stderr: String,
    },

    /// Structured output from the tool could not be parsed.
    #[error("failed to parse {tool} output: {message}")]
    DecodeFailed { tool: String, message: String },

    /// The argument vector cannot be launched.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a tool unhealthy error.
    pub fn tool_unhealthy(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolUnhealthy {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a launch failure error.
    pub fn launch_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LaunchFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a decode failure error.
    pub fn decode_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DecodeFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Diagnostic text captured from the tool's stderr, if this error carries any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr, .. }
            | Self::ProcessFailed { stderr, .. }
            | Self::Aborted { stderr, .. }
            | Self::Exec { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Whether this error came from the readiness check rather than a run.
    pub fn is_readiness(&self) -> bool {
        matches!(self, Self::ToolNotFound { .. } | Self::ToolUnhealthy { .. })
    }
}
