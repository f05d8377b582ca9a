use thiserror::Error;

use crate::session::lifecycle::SessionState;

/// Errors surfaced synchronously by the session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    Configuration(String),
    #[error("cannot {operation} a session in state {state}")]
    Lifecycle {
        operation: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    pub(crate) fn configuration<S: Into<String>>(message: S) -> Self {
        SessionError::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SessionError::Configuration(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, SessionError::Lifecycle { .. })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("output sink is closed")]
    Closed,
    /// The transport fell behind and the outbound buffer stayed full.
    #[error("output sink is full")]
    Full,
}

/// Failure of a pipeline stage on a single unit of work.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("stage engine failed: {0}")]
    Engine(#[from] anyhow::Error),
    #[error("stage is closed")]
    Closed,
}

impl StageError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        StageError::MalformedInput(message.into())
    }
}
