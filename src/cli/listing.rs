//! List pull requests for a repository.

use std::io;

use pullreq::model::PullReqFilter;
use pullreq::{EngineError, PullReqConfig};

use super::output::write_listing;
use super::{build_engine, operator_context};

/// Prints every pull request targeting the configured repository.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] when the repository, database or
/// ref source is missing, and any engine error raised by the listing.
pub async fn run(config: &PullReqConfig) -> Result<(), EngineError> {
    let repo = config.require_repo()?;
    let engine = build_engine(config)?;

    let pull_requests = engine
        .list_pull_requests(&operator_context(), repo, &PullReqFilter::default())
        .await?;

    let mut stdout = io::stdout().lock();
    write_listing(&mut stdout, repo, &pull_requests)
}
