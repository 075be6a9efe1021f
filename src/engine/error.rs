//! Error taxonomy surfaced by the pull request engine.

use thiserror::Error;

use crate::cancel::Cancelled;

/// Errors returned by engine operations.
///
/// `Validation`, `NotFound`, `Conflict` and `Authorization` are client-facing
/// and carry a human-readable message. `Internal` wraps storage or RPC
/// failures; its message is meant for logs, not for end users.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input, an illegal state transition, or an edit the caller
    /// may not perform.
    #[error("{message}")]
    Validation {
        /// Explanation suitable for the caller.
        message: String,
    },

    /// A repository, pull request, or comment does not exist.
    #[error("{message}")]
    NotFound {
        /// Explanation suitable for the caller.
        message: String,
    },

    /// A duplicate open pull request, or the optimistic retry budget ran out.
    #[error("{message}")]
    Conflict {
        /// Explanation suitable for the caller.
        message: String,
        /// Number of the already-open pull request, when that is the cause.
        existing_number: Option<i64>,
    },

    /// The authorization gate denied the operation.
    #[error("{message}")]
    Authorization {
        /// Generic denial message; never confirms that a resource exists.
        message: String,
    },

    /// Storage or RPC failure.
    #[error("internal error: {message}")]
    Internal {
        /// Detail for operators.
        message: String,
    },

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {message}")]
    Configuration {
        /// Details about the configuration failure.
        message: String,
    },

    /// Writing command output failed.
    #[error("I/O error: {message}")]
    Io {
        /// Error detail.
        message: String,
    },
}

impl EngineError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn denied() -> Self {
        Self::Authorization {
            message: "access denied".to_owned(),
        }
    }

    /// Number of the conflicting open pull request, if any.
    #[must_use]
    pub const fn existing_number(&self) -> Option<i64> {
        match self {
            Self::Conflict {
                existing_number, ..
            } => *existing_number,
            _ => None,
        }
    }
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
