//! Print one pull request and its timeline.

use std::io;

use pullreq::model::{ActivityFilter, PullReqRef};
use pullreq::{EngineError, PullReqConfig};

use super::output::write_timeline;
use super::{build_engine, operator_context};

/// Prints the configured pull request followed by its visible timeline.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] when the repository, number,
/// database or ref source is missing, and any engine error raised by the
/// lookups.
pub async fn run(config: &PullReqConfig) -> Result<(), EngineError> {
    let repo = config.require_repo()?;
    let number = config.number.ok_or_else(|| EngineError::Configuration {
        message: "pull request number is required (use --number or -n)".to_owned(),
    })?;
    let engine = build_engine(config)?;
    let ctx = operator_context();
    let pr_ref = PullReqRef::new(repo, number);

    let pr = engine.find_pull_request(&ctx, &pr_ref).await?;
    let activities = engine
        .list_activities(&ctx, &pr_ref, &ActivityFilter::default())
        .await?;

    let mut stdout = io::stdout().lock();
    write_timeline(&mut stdout, &pr, &activities)
}
