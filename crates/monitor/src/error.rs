//! Error types for runtrace-monitor

use runtrace_core::TransitionError;
use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while monitoring an execution
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The requested state change is not allowed from the current state
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Writing to or reading from the repository failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] runtrace_core::Error),

    /// No monitor or stored record with this id
    #[error("Execution not found: {id}")]
    NotFound { id: String },
}

impl MonitorError {
    /// Create a NotFound error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Whether this error came from a rejected state change
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Transition(_))
    }
}
