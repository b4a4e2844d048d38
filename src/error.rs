//! Errors returned by the session API.
//!
//! Failures the server reports travel as a context's result status, not through this type.
//! These are the failures of the calls themselves, such as rejected input or a stale token.
//! A transport that refuses a frame ends the operation with its status.

use thiserror::Error;

use crate::Unique;
use crate::status::NtStatus;

/// Session API error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// No live context carries this token: it completed already or never existed.
    #[error("no operation in flight for unique {0}")]
    StaleToken(Unique),

    /// The context exists but is not waiting for a reply.
    #[error("operation {0} is not suspended")]
    NotSuspended(Unique),

    /// The reply names another operation than the one it was delivered to.
    #[error("reply for unique {got} delivered to operation {expected}")]
    UniqueMismatch {
        /// Token of the context being resumed
        expected: Unique,
        /// Token found in the reply header
        got: Unique,
    },

    /// A lookup name does not fit the limits in effect.
    #[error("name of {len} bytes exceeds the limit of {max}")]
    NameTooLong {
        /// Length of the rejected name
        len: usize,
        /// Largest accepted length
        max: usize,
    },

    /// A lookup name contains a NUL byte.
    #[error("name contains a NUL byte")]
    InvalidName,

    /// A forget operation was requested for an empty list.
    #[error("forget list is empty")]
    EmptyForgetList,

    /// Every slot of the context table is in use.
    #[error("too many operations in flight")]
    Exhausted,

    /// A reply buffer could not be decoded.
    #[error("malformed reply: {0}")]
    Malformed(&'static str),
}

impl Error {
    /// The native status a dispatch routine reports for this error.
    pub fn status(&self) -> NtStatus {
        match self {
            Error::StaleToken(_) | Error::NotSuspended(_) | Error::UniqueMismatch { .. } => {
                NtStatus::INVALID_PARAMETER
            }
            Error::NameTooLong { .. } => NtStatus::NAME_TOO_LONG,
            Error::InvalidName => NtStatus::OBJECT_NAME_INVALID,
            Error::EmptyForgetList => NtStatus::INVALID_PARAMETER,
            Error::Exhausted => NtStatus::INSUFFICIENT_RESOURCES,
            Error::Malformed(_) => NtStatus::INVALID_NETWORK_RESPONSE,
        }
    }
}

/// Result type of the session API.
pub type Result<T> = std::result::Result<T, Error>;
