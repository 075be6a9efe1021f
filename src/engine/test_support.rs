//! Engine fixtures backed by a migrated temporary database.
#![expect(clippy::expect_used, reason = "test code; panics are acceptable")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auth::{AuthorizationGate, GrantTableGate, Permission};
use crate::git::{GitRefResolver, RefError, RefInfo, RefKind};
use crate::model::{
    NewRepository, Principal, PrincipalId, PullReqRef, PullRequest, Repository, Session,
};
use crate::persistence::test_helpers::{MigratedDatabase, migrated_database};
use crate::persistence::{RepositoryStore, RetryBudget, SqliteRepositoryStore};
use crate::telemetry::TelemetrySink;
use crate::telemetry::test_support::RecordingTelemetrySink;

use super::{CallContext, CreatePullRequest, EngineParts, PullReqEngine};

pub(super) const REPO_PATH: &str = "acme/widgets";
pub(super) const MAIN_SHA: &str = "1111111111111111111111111111111111111111";
pub(super) const FEATURE_SHA: &str = "2222222222222222222222222222222222222222";

/// Branch heads keyed by `(git_uid, branch)`.
#[derive(Debug, Default)]
pub(super) struct FakeRefs {
    heads: Mutex<HashMap<(String, String), String>>,
}

impl FakeRefs {
    pub(super) fn set_head(&self, git_uid: &str, branch: &str, sha: &str) {
        self.heads
            .lock()
            .expect("heads mutex should be available")
            .insert((git_uid.to_owned(), branch.to_owned()), sha.to_owned());
    }

    pub(super) fn remove(&self, git_uid: &str, branch: &str) {
        self.heads
            .lock()
            .expect("heads mutex should be available")
            .remove(&(git_uid.to_owned(), branch.to_owned()));
    }
}

#[async_trait]
impl GitRefResolver for FakeRefs {
    async fn resolve_ref(
        &self,
        repo: &Repository,
        name: &str,
        kind: RefKind,
    ) -> Result<RefInfo, RefError> {
        let heads = self.heads.lock().expect("heads mutex should be available");
        heads
            .get(&(repo.git_uid.clone(), name.to_owned()))
            .map(|sha| RefInfo {
                name: name.to_owned(),
                kind,
                sha: sha.clone(),
            })
            .ok_or_else(|| RefError::NotFound {
                name: name.to_owned(),
                kind,
            })
    }
}

pub(super) fn principal(id: i64, uid: &str, admin: bool) -> Session {
    Session::new(Principal {
        id: PrincipalId::new(id),
        uid: uid.to_owned(),
        display_name: uid.to_owned(),
        admin,
    })
}

pub(super) fn author() -> CallContext {
    CallContext::new(principal(1, "alice", false))
}

pub(super) fn reviewer() -> CallContext {
    CallContext::new(principal(2, "bob", false))
}

pub(super) fn outsider() -> CallContext {
    CallContext::new(principal(3, "mallory", false))
}

pub(super) fn admin() -> CallContext {
    CallContext::new(principal(9, "root", true))
}

pub(super) fn feature_request() -> CreatePullRequest {
    CreatePullRequest {
        target_repo_ref: REPO_PATH.to_owned(),
        source_repo_ref: None,
        source_branch: "feature".to_owned(),
        target_branch: "main".to_owned(),
        title: "Add feature".to_owned(),
        description: String::new(),
    }
}

pub(super) fn pr_ref(number: i64) -> PullReqRef {
    PullReqRef::new(REPO_PATH, number)
}

/// An engine wired to `SQLite` stores, an in-memory ref table and a grant
/// table in which alice and bob may read, comment and review.
pub(super) struct Harness {
    pub(super) engine: PullReqEngine,
    pub(super) parts: EngineParts,
    pub(super) grants: Arc<GrantTableGate>,
    pub(super) refs: Arc<FakeRefs>,
    pub(super) telemetry: Arc<RecordingTelemetrySink>,
    pub(super) repo: Repository,
    _database: MigratedDatabase,
}

impl Harness {
    pub(super) async fn new() -> Self {
        Self::with_budget(RetryBudget::DEFAULT).await
    }

    pub(super) async fn with_budget(budget: RetryBudget) -> Self {
        let migrated = migrated_database();
        let repo = SqliteRepositoryStore::new(migrated.database.clone())
            .create(&NewRepository {
                path: REPO_PATH.to_owned(),
                git_uid: "widgets".to_owned(),
                default_branch: "main".to_owned(),
            })
            .await
            .expect("repository should be registered");

        let refs = Arc::new(FakeRefs::default());
        refs.set_head("widgets", "main", MAIN_SHA);
        refs.set_head("widgets", "feature", FEATURE_SHA);

        let grants = Arc::new(GrantTableGate::new());
        for id in [1, 2] {
            grants.grant(
                PrincipalId::new(id),
                repo.id,
                [
                    Permission::RepoView,
                    Permission::PullReqComment,
                    Permission::PullReqReview,
                ],
            );
        }

        let telemetry = Arc::new(RecordingTelemetrySink::default());
        let parts = EngineParts::sqlite(
            &migrated.database,
            budget,
            Arc::clone(&grants) as Arc<dyn AuthorizationGate>,
            Arc::clone(&refs) as Arc<dyn GitRefResolver>,
            Arc::clone(&telemetry) as Arc<dyn TelemetrySink>,
        );

        Self {
            engine: PullReqEngine::new(parts.clone()),
            parts,
            grants,
            refs,
            telemetry,
            repo,
            _database: migrated,
        }
    }

    /// Engine over the same stores with some collaborators replaced.
    pub(super) fn engine_with(&self, customise: impl FnOnce(&mut EngineParts)) -> PullReqEngine {
        let mut parts = self.parts.clone();
        customise(&mut parts);
        PullReqEngine::new(parts)
    }

    /// Opens `feature -> main` as alice.
    pub(super) async fn open_feature(&self) -> PullRequest {
        self.engine
            .create_pull_request(&author(), &feature_request())
            .await
            .expect("pull request should be created")
    }
}
