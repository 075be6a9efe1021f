//! Resolver reading bare repositories from local disk with `git2`.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use git2::{ErrorCode, Reference, Repository as GitRepository};

use crate::model::Repository;

use super::{GitRefResolver, RefError, RefInfo, RefKind};

/// Resolves refs in bare repositories stored as `<root>/<git_uid>.git`.
#[derive(Debug, Clone)]
pub struct Git2RefResolver {
    root: Utf8PathBuf,
}

impl Git2RefResolver {
    /// Creates a resolver over the repositories under `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of the bare repository backing `repo`.
    #[must_use]
    pub fn repository_path(&self, repo: &Repository) -> Utf8PathBuf {
        self.root.join(format!("{}.git", repo.git_uid))
    }
}

fn resolve_blocking(path: &Utf8Path, name: &str, kind: RefKind) -> Result<RefInfo, RefError> {
    let not_found = || RefError::NotFound {
        name: name.to_owned(),
        kind,
    };

    let qualified = kind.qualify(name);
    if name.is_empty() || !Reference::is_valid_name(&qualified) {
        return Err(not_found());
    }

    let repository = GitRepository::open_bare(path).map_err(|error| RefError::Transient {
        message: format!("failed to open repository at {path}: {error}"),
    })?;

    let reference = match repository.find_reference(&qualified) {
        Ok(reference) => reference,
        Err(error) if error.code() == ErrorCode::NotFound => return Err(not_found()),
        Err(error) => {
            return Err(RefError::Transient {
                message: format!("failed to read {qualified}: {error}"),
            });
        }
    };

    let commit = reference
        .peel_to_commit()
        .map_err(|error| RefError::Transient {
            message: format!("{qualified} does not point at a commit: {error}"),
        })?;

    Ok(RefInfo {
        name: name.to_owned(),
        kind,
        sha: commit.id().to_string(),
    })
}

#[async_trait]
impl GitRefResolver for Git2RefResolver {
    async fn resolve_ref(
        &self,
        repo: &Repository,
        name: &str,
        kind: RefKind,
    ) -> Result<RefInfo, RefError> {
        let path = self.repository_path(repo);
        let ref_name = name.to_owned();
        tokio::task::spawn_blocking(move || resolve_blocking(&path, &ref_name, kind))
            .await
            .map_err(|error| RefError::Transient {
                message: format!("ref resolution task failed: {error}"),
            })?
    }
}
