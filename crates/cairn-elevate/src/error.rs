//! Escalation error types.

use cairn_core::OpError;
use thiserror::Error;

/// Errors produced by the escalation bridge.
#[derive(Debug, Error)]
pub enum EscalationError {
    /// The consent gate said no.
    #[error("Operation cancelled")]
    Declined,

    /// The user dismissed the OS privilege prompt.
    #[error("Operation cancelled by user")]
    DeclinedAtPrompt,

    /// The elevated process ran past its deadline and was killed.
    #[error("Elevated operation timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// The process was force-terminated during shutdown.
    #[error("Elevated operation was terminated")]
    Terminated,

    /// The elevated command ran and failed.
    #[error("{message}")]
    Failed { message: String },

    /// A value contained a null byte.
    #[error("Refusing to elevate: {field} contains a null byte")]
    NullByte { field: &'static str },

    /// The request cannot be turned into a script.
    #[error("Invalid elevation request: {reason}")]
    InvalidRequest { reason: String },

    /// Writing the script or spawning the launcher failed.
    #[error("Failed to launch elevated process: {0}")]
    Io(#[from] std::io::Error),
}

impl EscalationError {
    /// Whether the user chose not to proceed.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Declined | Self::DeclinedAtPrompt | Self::TimedOut { .. }
        )
    }
}

impl From<EscalationError> for OpError {
    fn from(e: EscalationError) -> Self {
        match e {
            EscalationError::Declined => OpError::Cancelled,
            EscalationError::DeclinedAtPrompt => OpError::CancelledByUser,
            EscalationError::TimedOut { secs } => OpError::TimedOut { secs },
            other => OpError::Elevation {
                message: other.to_string(),
            },
        }
    }
}
