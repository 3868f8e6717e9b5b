//! Session status types for card session tracking.

use serde::{Deserialize, Serialize};

/// Reader/card presence state of a card session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Not probing yet, or recovering after an error
    #[default]
    #[serde(rename = "state_idle")]
    Idle,
    /// A cycle failed; transient until the error pause elapses
    #[serde(rename = "state_error")]
    Error,
    /// No reader attached
    #[serde(rename = "state_noreaders")]
    NoReaders,
    /// Reader attached, no card seated
    #[serde(rename = "state_noeidpresent")]
    NoCardPresent,
    /// Card seated in a reader
    #[serde(rename = "state_eidpresent")]
    CardPresent,
}

impl SessionState {
    /// Stable presentation key for message lookup.
    pub fn key(&self) -> &'static str {
        match self {
            SessionState::Idle => "state_idle",
            SessionState::Error => "state_error",
            SessionState::NoReaders => "state_noreaders",
            SessionState::NoCardPresent => "state_noeidpresent",
            SessionState::CardPresent => "state_eidpresent",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// What the session is doing with a present card.
///
/// Only meaningful while the state is [`SessionState::CardPresent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Activity {
    /// Nothing in progress
    #[default]
    #[serde(rename = "activity_idle")]
    Idle,
    /// Reading the identity record
    #[serde(rename = "reading_identity")]
    ReadingIdentity,
    /// Reading the address record
    #[serde(rename = "reading_address")]
    ReadingAddress,
    /// Reading the photo
    #[serde(rename = "reading_photo")]
    ReadingPhoto,
    /// Reading the authentication certificate chain
    #[serde(rename = "reading_auth_chain")]
    ReadingAuthChain,
    /// Reading the signing certificate chain
    #[serde(rename = "reading_sign_chain")]
    ReadingSignChain,
}

impl Activity {
    /// Read steps in the order a card is read.
    pub const READ_SEQUENCE: [Activity; 5] = [
        Activity::ReadingIdentity,
        Activity::ReadingAddress,
        Activity::ReadingPhoto,
        Activity::ReadingAuthChain,
        Activity::ReadingSignChain,
    ];

    /// Stable presentation key for message lookup.
    pub fn key(&self) -> &'static str {
        match self {
            Activity::Idle => "activity_idle",
            Activity::ReadingIdentity => "reading_identity",
            Activity::ReadingAddress => "reading_address",
            Activity::ReadingPhoto => "reading_photo",
            Activity::ReadingAuthChain => "reading_auth_chain",
            Activity::ReadingSignChain => "reading_sign_chain",
        }
    }

    /// Whether this activity is one of the read steps.
    pub fn is_reading(&self) -> bool {
        !matches!(self, Activity::Idle)
    }

    /// Activity that follows this one in the read sequence.
    ///
    /// The last read step is followed by `Idle`, and `Idle` stays `Idle`.
    pub fn next(&self) -> Activity {
        match self {
            Activity::ReadingIdentity => Activity::ReadingAddress,
            Activity::ReadingAddress => Activity::ReadingPhoto,
            Activity::ReadingPhoto => Activity::ReadingAuthChain,
            Activity::ReadingAuthChain => Activity::ReadingSignChain,
            Activity::ReadingSignChain | Activity::Idle => Activity::Idle,
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Foreground command waiting to be serviced by the background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingCommand {
    /// No command pending
    #[default]
    None,
    /// Change the card PIN
    ChangePin,
}

impl PendingCommand {
    /// Whether no command is pending.
    pub fn is_none(&self) -> bool {
        matches!(self, PendingCommand::None)
    }
}

/// Result of the most recently serviced command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The PIN was changed
    PinChanged,
    /// The PIN change failed; the session stayed in `CardPresent`
    PinChangeFailed {
        /// Failure description from the card access layer
        reason: String,
    },
}

impl CommandOutcome {
    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::PinChanged)
    }
}

/// Consistent snapshot of a card session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Presence state
    pub state: SessionState,
    /// Current activity
    pub activity: Activity,
    /// Command waiting to run
    pub pending_command: PendingCommand,
    /// Identity record has been read
    pub has_identity: bool,
    /// Address record has been read
    pub has_address: bool,
    /// Photo has been read
    pub has_photo: bool,
    /// Authentication chain has been read
    pub has_auth_chain: bool,
    /// Signing chain has been read
    pub has_sign_chain: bool,
    /// Outcome of the last serviced command
    pub last_command: Option<CommandOutcome>,
}

impl SessionStatus {
    /// Whether a foreground command would be accepted.
    pub fn is_ready_for_command(&self) -> bool {
        self.state == SessionState::CardPresent
            && self.activity == Activity::Idle
            && self.pending_command.is_none()
    }

    /// Whether every card field has been read.
    pub fn is_complete(&self) -> bool {
        self.has_identity
            && self.has_address
            && self.has_photo
            && self.has_auth_chain
            && self.has_sign_chain
    }
}
