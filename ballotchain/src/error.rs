use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotchain: election {0} not found")]
    ElectionNotFound(String),

    #[error("ballotchain: node {0} not found in roster")]
    NodeNotFound(String),

    #[error("ballotchain: election {0} already exists")]
    ElectionExists(String),

    #[error("ballotchain: election {name} is {state}, cannot {operation}")]
    InvalidState {
        name: String,
        state: ElectionState,
        operation: &'static str,
    },

    #[error("ballotchain: public key of election {0} is already set")]
    KeyAlreadySet(String),

    #[error("ballotchain: {0} round {1} did not finish in time")]
    ProtocolTimeout(RoundKind, RunId),

    #[error("ballotchain: {0} round {1} reached {2} of {3} nodes")]
    IncompleteTree(RoundKind, RunId, usize, usize),

    #[error("ballotchain: {0} round failed: {1}")]
    Protocol(RoundKind, String),

    #[error("ballotchain: ledger of election {election} is corrupted at block {index}")]
    Corruption { election: String, index: u64 },

    #[error("ballotchain: transport error: {0}")]
    Transport(String),

    #[error("ballotchain: pin mismatch")]
    PinMismatch,

    #[error("ballotchain: user is not allowed to {0}")]
    Unauthorized(&'static str),

    #[error("ballotchain: not enough secret shares: need {0}, found {1}")]
    NotEnoughShares(usize, usize),

    #[error("ballotchain: invalid roster: {0}")]
    InvalidRoster(String),

    #[error("ballotchain: invalid configuration: {0}")]
    Config(String),

    #[error("ballotchain: invalid encoding: {0}")]
    Encoding(String),

    #[error("ballotchain: CBOR error: {0}")]
    CBOR(#[from] serde_cbor::Error),

    #[error("ballotchain: JSON error: {0}")]
    JSON(#[from] serde_json::Error),

    #[error("ballotchain: storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes callers act upon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    State,
    ProtocolTimeout,
    Protocol,
    Corruption,
    Transport,
    Unauthorized,
    Invalid,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ElectionNotFound(_) | Error::NodeNotFound(_) => ErrorKind::NotFound,
            Error::ElectionExists(_) | Error::InvalidState { .. } | Error::KeyAlreadySet(_) => {
                ErrorKind::State
            }
            Error::ProtocolTimeout(..) | Error::IncompleteTree(..) => ErrorKind::ProtocolTimeout,
            Error::Protocol(..) | Error::NotEnoughShares(..) => ErrorKind::Protocol,
            Error::Corruption { .. } => ErrorKind::Corruption,
            Error::Transport(_) => ErrorKind::Transport,
            Error::PinMismatch | Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::InvalidRoster(_) | Error::Config(_) | Error::Encoding(_) => ErrorKind::Invalid,
            Error::CBOR(_) | Error::JSON(_) | Error::Io(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller may re-issue the request with a fresh round.
    ///
    /// Transport faults surface from the messaging substrate and are treated
    /// like a round that never completed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProtocolTimeout | ErrorKind::Transport
        )
    }
}
