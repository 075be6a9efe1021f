//! Shared test utilities.

use std::path::Path;

use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

pub mod runtime;

/// Creates a temporary directory for database and repository tests.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
pub fn create_temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|error| panic!("failed to create temporary directory: {error}"))
}

fn signature() -> Signature<'static> {
    Signature::now("Test Author", "author@example.com")
        .unwrap_or_else(|error| panic!("signature should be valid: {error}"))
}

fn open_bare(root: &Path, git_uid: &str) -> Repository {
    Repository::open_bare(root.join(format!("{git_uid}.git")))
        .unwrap_or_else(|error| panic!("bare repository {git_uid} should open: {error}"))
}

/// Creates `<root>/<git_uid>.git` with one empty-tree commit per branch and
/// returns the head of each branch in the order given.
///
/// # Panics
///
/// Panics if any git operation fails.
pub fn init_bare_repo(root: &Path, git_uid: &str, branches: &[&str]) -> Vec<String> {
    let repo = Repository::init_bare(root.join(format!("{git_uid}.git")))
        .unwrap_or_else(|error| panic!("bare repository should be created: {error}"));
    let signature = signature();
    let tree_id = repo
        .treebuilder(None)
        .and_then(|builder| builder.write())
        .unwrap_or_else(|error| panic!("empty tree should be written: {error}"));
    let tree = repo
        .find_tree(tree_id)
        .unwrap_or_else(|error| panic!("empty tree should exist: {error}"));

    branches
        .iter()
        .map(|branch| {
            repo.commit(
                Some(&format!("refs/heads/{branch}")),
                &signature,
                &signature,
                &format!("start {branch}"),
                &tree,
                &[],
            )
            .map(|oid| oid.to_string())
            .unwrap_or_else(|error| panic!("commit on {branch} should succeed: {error}"))
        })
        .collect()
}

/// Adds a commit on top of `branch` and returns the new head.
///
/// # Panics
///
/// Panics if the branch is missing or the commit fails.
pub fn advance_branch(root: &Path, git_uid: &str, branch: &str) -> String {
    let repo = open_bare(root, git_uid);
    let refname = format!("refs/heads/{branch}");
    let parent = repo
        .find_reference(&refname)
        .and_then(|reference| reference.peel_to_commit())
        .unwrap_or_else(|error| panic!("branch {branch} should exist: {error}"));
    let tree = parent
        .tree()
        .unwrap_or_else(|error| panic!("parent tree should load: {error}"));
    let signature = signature();

    let oid: Oid = repo
        .commit(
            Some(&refname),
            &signature,
            &signature,
            &format!("advance {branch}"),
            &tree,
            &[&parent],
        )
        .unwrap_or_else(|error| panic!("commit on {branch} should succeed: {error}"));
    oid.to_string()
}
