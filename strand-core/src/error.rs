use thiserror::Error;

use crate::engine::ConfKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrandError {
    #[error("Invalid handle: {0} resource was released or never created")]
    InvalidHandle(&'static str),

    #[error("Failed to create {0}")]
    CreationFailed(String),

    #[error("Invalid value for configuration property \"{name}\": {reason}")]
    InvalidProperty { name: String, reason: String },

    #[error("Unknown configuration property \"{name}\": {reason}")]
    UnknownProperty { name: String, reason: String },

    #[error("Malformed configuration dump: expected key/value pairs, got {0} strings")]
    MalformedDump(usize),

    #[error("Engine returned no data for {0} configuration dump")]
    EmptyDump(ConfKind),

    #[error("Unexpected engine result {code} while {context}")]
    UnexpectedEngine { code: i32, context: String },

    #[error("Operation not supported on {0} configuration")]
    WrongKind(ConfKind),
}

pub type Result<T> = std::result::Result<T, StrandError>;
