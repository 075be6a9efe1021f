//! In-process grant table.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::model::{PrincipalId, RepoId, Repository, Session};

use super::{AccessDecision, AuthorizationGate, Permission};

/// Grants permissions per `(principal, repository)` pair.
///
/// Administrators pass every check.
#[derive(Debug, Default)]
pub struct GrantTableGate {
    grants: RwLock<HashMap<(PrincipalId, RepoId), BTreeSet<Permission>>>,
}

impl GrantTableGate {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `permissions` on `repo_id` to `principal_id`.
    pub fn grant(
        &self,
        principal_id: PrincipalId,
        repo_id: RepoId,
        permissions: impl IntoIterator<Item = Permission>,
    ) {
        let Ok(mut grants) = self.grants.write() else {
            tracing::warn!("grant table lock poisoned; grant for {principal_id} dropped");
            return;
        };
        grants
            .entry((principal_id, repo_id))
            .or_default()
            .extend(permissions);
    }

    /// Removes every permission `principal_id` holds on `repo_id`.
    pub fn revoke_all(&self, principal_id: PrincipalId, repo_id: RepoId) {
        if let Ok(mut grants) = self.grants.write() {
            grants.remove(&(principal_id, repo_id));
        }
    }

    fn holds(&self, principal_id: PrincipalId, repo_id: RepoId, permission: Permission) -> bool {
        self.grants.read().is_ok_and(|grants| {
            grants
                .get(&(principal_id, repo_id))
                .is_some_and(|held| held.contains(&permission))
        })
    }
}

#[async_trait]
impl AuthorizationGate for GrantTableGate {
    async fn check(
        &self,
        session: &Session,
        repo: &Repository,
        permission: Permission,
    ) -> AccessDecision {
        let principal = &session.principal;
        if principal.admin || self.holds(principal.id, repo.id, permission) {
            return AccessDecision::Allow;
        }
        AccessDecision::Deny {
            reason: format!(
                "{} lacks {permission} on {}",
                principal.uid, repo.path
            ),
        }
    }
}
