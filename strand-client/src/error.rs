use std::fmt;

use strand_core::{ErrorCode, StrandError};

use crate::consumer::ConsumerState;

/// Errors that can occur during client operations
#[derive(Debug)]
pub enum ClientError {
    /// Handle, configuration store or dump failure from the core layer
    Core(StrandError),
    /// The consumer has been closed
    AlreadyClosed,
    /// Operation not permitted in the consumer's current state
    InvalidState {
        /// Operation attempted
        op: &'static str,
        /// State the consumer was in
        state: ConsumerState,
    },
    /// Caller supplied an unusable argument
    InvalidArgument(String),
    /// The engine rejected a consumer operation
    Engine {
        /// Engine error code
        code: ErrorCode,
        /// Operation or diagnostic
        reason: String,
    },
    /// Client configuration could not be loaded or applied
    Config(String),
    /// A record key or payload could not be decoded
    Deserialize(String),
    /// I/O error from an offset store or configuration file
    IoError(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(e) => write!(f, "{e}"),
            Self::AlreadyClosed => write!(f, "Consumer already closed"),
            Self::InvalidState { op, state } => {
                write!(f, "Cannot {op} while consumer is {state}")
            },
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::Engine { code, reason } => write!(f, "{reason}: {code}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Deserialize(msg) => write!(f, "Deserialization error: {msg}"),
            Self::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl ClientError {
    /// Returns true if the operation may succeed when retried unchanged.
    /// Configuration, state and handle errors never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Engine { code, .. } => matches!(code, ErrorCode::TimedOut),
            Self::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub(crate) fn engine(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Engine {
            code,
            reason: reason.into(),
        }
    }

    pub(crate) fn poisoned(e: impl fmt::Display) -> Self {
        Self::IoError(std::io::Error::other(format!("Lock poisoned: {e}")))
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(e) => Some(e),
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<StrandError> for ClientError {
    fn from(err: StrandError) -> Self {
        Self::Core(err)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
