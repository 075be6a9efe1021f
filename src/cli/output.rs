//! Output formatting utilities for CLI operations.

use std::io::{self, Write};

use pullreq::EngineError;
use pullreq::model::{ActivityPayload, PullReqActivity, PullRequest};

fn io_error(error: &io::Error) -> EngineError {
    EngineError::Io {
        message: error.to_string(),
    }
}

/// One-line summary of a pull request.
pub fn pull_request_line(pr: &PullRequest) -> String {
    format!(
        "#{} [{}] {} ({} -> {})",
        pr.number, pr.state, pr.title, pr.source_branch, pr.target_branch
    )
}

/// Human-readable rendering of an activity payload.
pub fn describe_payload(payload: &ActivityPayload) -> String {
    match payload {
        ActivityPayload::Comment { text } => text.clone(),
        ActivityPayload::CodeComment { text, location } => {
            format!("{}:{}: {text}", location.path, location.line)
        }
        ActivityPayload::StateChange { old, new } => format!("changed state from {old} to {new}"),
        ActivityPayload::Merge {
            merge_sha,
            source_branch,
            target_branch,
        } => format!("merged {source_branch} into {target_branch} at {merge_sha}"),
        ActivityPayload::TitleChange { old, new } => {
            format!("changed title from \"{old}\" to \"{new}\"")
        }
        ActivityPayload::BranchUpdate { old_sha, new_sha } => {
            format!("source branch moved from {old_sha} to {new_sha}")
        }
        ActivityPayload::ReviewSubmit {
            decision,
            commit_sha,
        } => format!("submitted review ({decision}) at {commit_sha}"),
    }
}

/// Writes a listing of pull requests to the given writer.
pub fn write_listing<W: Write>(
    writer: &mut W,
    repo: &str,
    pull_requests: &[PullRequest],
) -> Result<(), EngineError> {
    writeln!(writer, "Pull requests for {repo}:").map_err(|e| io_error(&e))?;
    if pull_requests.is_empty() {
        writeln!(writer, "  (none)").map_err(|e| io_error(&e))?;
    }
    for pr in pull_requests {
        writeln!(writer, "  {}", pull_request_line(pr)).map_err(|e| io_error(&e))?;
    }
    Ok(())
}

/// Writes a pull request header followed by its timeline. Replies are
/// indented under their parent.
pub fn write_timeline<W: Write>(
    writer: &mut W,
    pr: &PullRequest,
    activities: &[PullReqActivity],
) -> Result<(), EngineError> {
    writeln!(writer, "{}", pull_request_line(pr)).map_err(|e| io_error(&e))?;
    for activity in activities {
        let indent = if activity.is_reply() { "    " } else { "  " };
        writeln!(
            writer,
            "{indent}{}.{} {} by {}: {}",
            activity.order,
            activity.sub_order,
            activity.kind,
            activity.created_by,
            describe_payload(&activity.payload)
        )
        .map_err(|e| io_error(&e))?;
    }
    Ok(())
}
