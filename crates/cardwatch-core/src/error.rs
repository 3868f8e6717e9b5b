//! Error types for cardwatch.

use thiserror::Error;

use crate::Activity;

/// Main error type for cardwatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The reader went away
    #[error("Card reader unavailable")]
    ReaderUnavailable,

    /// The card left the reader
    #[error("Card removed")]
    CardRemoved,

    /// Generic failure reported by the card access layer
    #[error("Card operation failed: {0}")]
    Operation(String),

    /// A read step failed
    #[error("Read failed while {step}: {reason}")]
    ReadFailure {
        /// Step that was running
        step: Activity,
        /// Failure description
        reason: String,
    },

    /// PIN change failed
    #[error("PIN change failed: {0}")]
    PinChangeFailure(String),

    /// Anything the session cannot recover from in place
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is an ordinary presence change rather than a fault.
    pub fn is_transition(&self) -> bool {
        matches!(self, Error::ReaderUnavailable | Error::CardRemoved)
    }

    /// Attribute a card access failure to a read step.
    ///
    /// Presence changes pass through untouched.
    pub fn during_read(self, step: Activity) -> Self {
        match self {
            Error::Operation(reason) => Error::ReadFailure { step, reason },
            other => other,
        }
    }

    /// Attribute a card access failure to a PIN change.
    pub fn during_pin_change(self) -> Self {
        match self {
            Error::Operation(reason) => Error::PinChangeFailure(reason),
            other => other,
        }
    }

    /// Escalate a card access failure outside a read step.
    pub fn unrecoverable(self) -> Self {
        match self {
            Error::Operation(reason) => Error::Unrecoverable(reason),
            other => other,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
