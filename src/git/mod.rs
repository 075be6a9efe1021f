//! Branch and tag resolution against the git service.
//!
//! The engine never touches git objects directly. It asks a
//! [`GitRefResolver`] whether a ref exists and which commit it points at, and
//! distinguishes a missing ref (the caller named something that isn't there)
//! from a resolver that could not answer.

mod local;
mod rpc;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Repository;

pub use local::Git2RefResolver;
pub use rpc::HttpRefResolver;

/// Namespace of a ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// `refs/heads/*`.
    Branch,
    /// `refs/tags/*`.
    Tag,
}

impl RefKind {
    /// Path segment used by the ref service and in full ref names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "heads",
            Self::Tag => "tags",
        }
    }

    /// Fully qualified ref name for `name`.
    #[must_use]
    pub fn qualify(self, name: &str) -> String {
        format!("refs/{}/{name}", self.as_str())
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
        })
    }
}

/// A resolved ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefInfo {
    /// Short ref name, e.g. `main`.
    pub name: String,
    /// Ref namespace.
    pub kind: RefKind,
    /// Commit the ref points at.
    pub sha: String,
}

/// Why a ref could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefError {
    /// The repository has no such ref.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Requested ref name.
        name: String,
        /// Requested namespace.
        kind: RefKind,
    },

    /// The resolver failed to answer; retrying may succeed.
    #[error("ref resolution failed: {message}")]
    Transient {
        /// Failure detail.
        message: String,
    },
}

/// Resolves refs in hosted repositories.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitRefResolver: Send + Sync {
    /// Looks up `name` of `kind` in `repo`.
    async fn resolve_ref(
        &self,
        repo: &Repository,
        name: &str,
        kind: RefKind,
    ) -> Result<RefInfo, RefError>;
}
