//! Error mapping helpers translating collaborator failures into
//! [`EngineError`].

use crate::git::RefError;
use crate::model::{Repository, TransitionError};
use crate::persistence::PersistenceError;

use super::EngineError;

/// Maps a storage failure for `operation`.
///
/// Lost optimistic races that survived the retry budget and changes made
/// stale by a concurrent writer become `Conflict`. Rejected conditional
/// changes become `Validation`. Anything else is logged and surfaced as
/// `Internal`.
pub(super) fn map_persistence_error(operation: &str, error: PersistenceError) -> EngineError {
    match error {
        PersistenceError::NotFound { entity, .. } => {
            EngineError::not_found(format!("{entity} not found"))
        }
        PersistenceError::VersionConflict {
            entity, attempts, ..
        } => {
            tracing::warn!("{operation}: {entity} still contended after {attempts} attempts");
            EngineError::Conflict {
                message: format!("{entity} is being modified concurrently, try again"),
                existing_number: None,
            }
        }
        PersistenceError::UniqueViolation { message } => {
            tracing::debug!("{operation}: unique constraint rejected the write: {message}");
            EngineError::Conflict {
                message: "a conflicting record already exists".to_owned(),
                existing_number: None,
            }
        }
        PersistenceError::Rejected { message } => EngineError::validation(message),
        PersistenceError::Stale { message } => {
            tracing::debug!("{operation}: {message}");
            EngineError::Conflict {
                message,
                existing_number: None,
            }
        }
        other => {
            tracing::error!("{operation} failed: {other}");
            EngineError::internal(format!("{operation} failed: {other}"))
        }
    }
}

/// Maps a failed branch lookup.
///
/// Only a missing ref is the caller's problem; resolver failures are
/// propagated as `Internal` without retrying.
pub(super) fn map_branch_error(repo: &Repository, branch: &str, error: RefError) -> EngineError {
    match error {
        RefError::NotFound { .. } => EngineError::validation(format!(
            "branch {branch} does not exist in the repository {}",
            repo.path
        )),
        RefError::Transient { message } => {
            tracing::error!(
                "failed to check existence of the branch {branch} in the repository {}: {message}",
                repo.path
            );
            EngineError::internal(format!(
                "failed to check existence of the branch {branch} in the repository {}: {message}",
                repo.path
            ))
        }
    }
}

/// Maps an illegal lifecycle change detected before any write.
pub(super) fn map_transition_error(error: &TransitionError) -> EngineError {
    EngineError::validation(error.to_string())
}
