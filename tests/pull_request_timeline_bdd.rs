//! Behavioural tests for the pull request lifecycle over a real database and
//! real bare repositories.

mod support;

use std::sync::Arc;

use pullreq::auth::{AuthorizationGate, GrantTableGate, Permission};
use pullreq::git::{Git2RefResolver, GitRefResolver};
use pullreq::model::{
    ActivityFilter, ActivityPayload, NewRepository, Principal, PrincipalId, PullReqRef,
    PullReqState, PullRequest, Session,
};
use pullreq::persistence::{
    Database, RepositoryStore, RetryBudget, SqliteRepositoryStore, migrate_database,
};
use pullreq::telemetry::{NoopTelemetrySink, TelemetrySink};
use pullreq::{CallContext, CommentInput, CreatePullRequest, EngineError, EngineParts, PullReqEngine};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, scenario, then, when};
use tempfile::TempDir;

use support::runtime::{SharedRuntime, ensure_runtime};
use support::{advance_branch, create_temp_dir, init_bare_repo};

const REPO_PATH: &str = "acme/widgets";
const GIT_UID: &str = "widgets";

#[derive(ScenarioState, Default)]
struct TimelineState {
    runtime: Slot<SharedRuntime>,
    temp_dir: Slot<TempDir>,
    engine: Slot<PullReqEngine>,
    pull_request: Slot<PullRequest>,
    comment_ids: Slot<Vec<i64>>,
    latest_head: Slot<String>,
    error: Slot<EngineError>,
}

#[fixture]
fn timeline_state() -> TimelineState {
    TimelineState::default()
}

fn context(id: i64, uid: &str) -> CallContext {
    CallContext::new(Session::new(Principal {
        id: PrincipalId::new(id),
        uid: uid.to_owned(),
        display_name: uid.to_owned(),
        admin: false,
    }))
}

fn alice() -> CallContext {
    context(1, "alice")
}

fn bob() -> CallContext {
    context(2, "bob")
}

fn pr_ref() -> PullReqRef {
    PullReqRef::new(REPO_PATH, 1)
}

fn feature_request(source: &str, target: &str) -> CreatePullRequest {
    CreatePullRequest {
        target_repo_ref: REPO_PATH.to_owned(),
        source_repo_ref: None,
        source_branch: source.to_owned(),
        target_branch: target.to_owned(),
        title: format!("Merge {source}"),
        description: String::new(),
    }
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
fn runtime_and_engine(state: &TimelineState) -> (SharedRuntime, PullReqEngine) {
    let runtime = ensure_runtime(&state.runtime).expect("runtime should start");
    let engine = state
        .engine
        .with_ref(Clone::clone)
        .expect("engine not initialised");
    (runtime, engine)
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
fn repos_root(state: &TimelineState) -> std::path::PathBuf {
    state
        .temp_dir
        .with_ref(|dir| dir.path().join("repos"))
        .expect("temporary directory not initialised")
}

// --- Given steps ---

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[given("a hosted repository with branches main and feature")]
fn hosted_repository(timeline_state: &TimelineState) {
    let runtime = ensure_runtime(&timeline_state.runtime).expect("runtime should start");
    let temp_dir = create_temp_dir();
    let root = temp_dir.path().join("repos");
    std::fs::create_dir_all(&root).expect("repository root should be created");
    init_bare_repo(&root, GIT_UID, &["main", "feature"]);

    let database_url = temp_dir
        .path()
        .join("pullreq.sqlite")
        .to_string_lossy()
        .into_owned();
    migrate_database(&database_url, &NoopTelemetrySink).expect("migrations should run");
    let database = Database::new(database_url).expect("database URL should be accepted");

    let repo = runtime
        .block_on(
            SqliteRepositoryStore::new(database.clone()).create(&NewRepository {
                path: REPO_PATH.to_owned(),
                git_uid: GIT_UID.to_owned(),
                default_branch: "main".to_owned(),
            }),
        )
        .expect("repository should be registered");

    let grants = Arc::new(GrantTableGate::new());
    grants.grant(
        PrincipalId::new(1),
        repo.id,
        [
            Permission::RepoView,
            Permission::PullReqComment,
            Permission::RepoPush,
        ],
    );
    grants.grant(
        PrincipalId::new(2),
        repo.id,
        [Permission::RepoView, Permission::PullReqComment],
    );

    let parts = EngineParts::sqlite(
        &database,
        RetryBudget::DEFAULT,
        grants as Arc<dyn AuthorizationGate>,
        Arc::new(Git2RefResolver::new(root.to_string_lossy().into_owned()))
            as Arc<dyn GitRefResolver>,
        Arc::new(NoopTelemetrySink) as Arc<dyn TelemetrySink>,
    );

    timeline_state.engine.set(PullReqEngine::new(parts));
    timeline_state.temp_dir.set(temp_dir);
    timeline_state.comment_ids.set(Vec::new());
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[given("an open pull request from {source} into {target}")]
fn open_pull_request(timeline_state: &TimelineState, source: String, target: String) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let input = feature_request(source.trim_matches('"'), target.trim_matches('"'));

    let pr = runtime
        .block_on(engine.create_pull_request(&alice(), &input))
        .expect("pull request should open");
    timeline_state.pull_request.set(pr);
}

// --- When steps ---

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[when("alice comments {text}")]
fn alice_comments(timeline_state: &TimelineState, text: String) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let comment = runtime
        .block_on(engine.create_comment(
            &alice(),
            &pr_ref(),
            &CommentInput::text(text.trim_matches('"')),
        ))
        .expect("comment should be written");

    timeline_state
        .comment_ids
        .with_mut(|ids| ids.push(comment.id.get()))
        .expect("comment ids not initialised");
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[when("bob replies {text} to the first comment")]
fn bob_replies(timeline_state: &TimelineState, text: String) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let parent_id = timeline_state
        .comment_ids
        .with_ref(|ids| ids.first().copied())
        .flatten()
        .expect("a comment should exist");

    runtime
        .block_on(engine.reply_to_comment(&bob(), &pr_ref(), parent_id, text.trim_matches('"')))
        .expect("reply should be written");
}

#[when("the same pull request is opened again")]
fn open_again(timeline_state: &TimelineState) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let result =
        runtime.block_on(engine.create_pull_request(&alice(), &feature_request("feature", "main")));

    if let Err(error) = result {
        timeline_state.error.set(error);
    }
}

#[when("the {branch} branch receives a new commit")]
fn branch_receives_commit(timeline_state: &TimelineState, branch: String) {
    let head = advance_branch(
        &repos_root(timeline_state),
        GIT_UID,
        branch.trim_matches('"'),
    );
    timeline_state.latest_head.set(head);
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[when("the source branch is synced")]
fn sync_source(timeline_state: &TimelineState) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let pr = runtime
        .block_on(engine.sync_source_branch(&alice(), &pr_ref()))
        .expect("sync should succeed");
    timeline_state.pull_request.set(pr);
}

#[when("the pull request is merged")]
fn merge(timeline_state: &TimelineState) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    match runtime.block_on(engine.merge_pull_request(&alice(), &pr_ref())) {
        Ok(pr) => timeline_state.pull_request.set(pr),
        Err(error) => timeline_state.error.set(error),
    }
}

// --- Then steps ---

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the timeline positions are {expected}")]
fn timeline_positions(timeline_state: &TimelineState, expected: String) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let activities = runtime
        .block_on(engine.list_activities(&alice(), &pr_ref(), &ActivityFilter::default()))
        .expect("timeline should load");

    let positions: Vec<String> = activities
        .iter()
        .map(|activity| format!("{}.{}", activity.order, activity.sub_order))
        .collect();

    assert_eq!(positions.join(","), expected.trim_matches('"'));
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the request conflicts with pull request {number}")]
fn conflicts_with(timeline_state: &TimelineState, number: i64) {
    let error = timeline_state
        .error
        .with_ref(Clone::clone)
        .expect("expected an engine error");

    let EngineError::Conflict {
        existing_number, ..
    } = error
    else {
        panic!("expected a conflict, got {error:?}");
    };
    assert_eq!(existing_number, Some(number));
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the merge is refused as a conflict")]
fn merge_refused(timeline_state: &TimelineState) {
    let error = timeline_state
        .error
        .with_ref(Clone::clone)
        .expect("expected an engine error");

    assert!(
        matches!(error, EngineError::Conflict { existing_number: None, .. }),
        "expected a conflict, got {error:?}"
    );
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the pull request is still open")]
fn still_open(timeline_state: &TimelineState) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let pr = runtime
        .block_on(engine.find_pull_request(&alice(), &pr_ref()))
        .expect("pull request should load");

    assert_eq!(pr.state, PullReqState::Open);
    assert!(pr.merge.is_none());
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the pull request is merged at the latest {branch} head")]
fn merged_at_head(timeline_state: &TimelineState, branch: String) {
    assert_eq!(branch.trim_matches('"'), "feature");
    let head = timeline_state
        .latest_head
        .with_ref(Clone::clone)
        .expect("branch head not recorded");
    let pr = timeline_state
        .pull_request
        .with_ref(Clone::clone)
        .expect("pull request not recorded");

    assert_eq!(pr.state, PullReqState::Merged);
    assert_eq!(pr.source_sha, head);
    assert_eq!(pr.merge.map(|merge| merge.merge_sha), Some(head));
}

#[expect(clippy::expect_used, reason = "test code; panics are acceptable")]
#[then("the timeline ends with a branch update followed by the merge")]
fn timeline_ends_with_merge(timeline_state: &TimelineState) {
    let (runtime, engine) = runtime_and_engine(timeline_state);
    let activities = runtime
        .block_on(engine.list_activities(&alice(), &pr_ref(), &ActivityFilter::default()))
        .expect("timeline should load");

    let tail: Vec<&ActivityPayload> = activities
        .iter()
        .rev()
        .take(2)
        .rev()
        .map(|activity| &activity.payload)
        .collect();

    assert!(
        matches!(
            tail.as_slice(),
            [
                ActivityPayload::BranchUpdate { .. },
                ActivityPayload::Merge { .. }
            ]
        ),
        "unexpected timeline tail: {tail:?}"
    );
}

#[scenario(path = "tests/features/pull_request_timeline.feature", index = 0)]
fn comments_and_replies_take_ordered_positions(timeline_state: TimelineState) {
    let _ = timeline_state;
}

#[scenario(path = "tests/features/pull_request_timeline.feature", index = 1)]
fn second_open_pull_request_is_refused(timeline_state: TimelineState) {
    let _ = timeline_state;
}

#[scenario(path = "tests/features/pull_request_timeline.feature", index = 2)]
fn merge_after_source_moved_is_refused(timeline_state: TimelineState) {
    let _ = timeline_state;
}

#[scenario(path = "tests/features/pull_request_timeline.feature", index = 3)]
fn merge_after_sync_succeeds(timeline_state: TimelineState) {
    let _ = timeline_state;
}
