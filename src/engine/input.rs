//! Input sanitizing shared by the engine operations.

use super::EngineError;

/// Longest accepted pull request title, in characters.
pub const MAX_TITLE_LENGTH: usize = 256;

/// Longest accepted comment body, in characters.
pub const MAX_COMMENT_LENGTH: usize = 65_536;

/// Trims and checks a pull request title.
pub(super) fn sanitize_title(title: &str) -> Result<String, EngineError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("pull request title can't be empty"));
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(EngineError::validation(format!(
            "pull request title can't be longer than {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Checks a comment body. Surrounding whitespace is kept, but a body made
/// only of whitespace is rejected.
pub(super) fn sanitize_comment(text: &str) -> Result<String, EngineError> {
    if text.trim().is_empty() {
        return Err(EngineError::validation("comment text can't be empty"));
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(EngineError::validation(format!(
            "comment text can't be longer than {MAX_COMMENT_LENGTH} characters"
        )));
    }
    Ok(text.to_owned())
}

/// Checks a branch name before any lookup.
pub(super) fn require_branch(branch: &str) -> Result<&str, EngineError> {
    let trimmed = branch.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("branch name can't be empty"));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{MAX_TITLE_LENGTH, require_branch, sanitize_comment, sanitize_title};

    #[rstest]
    fn title_is_trimmed() {
        assert_eq!(sanitize_title("  Fix bug \n").ok(), Some("Fix bug".to_owned()));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_title_is_rejected(#[case] title: &str) {
        assert!(sanitize_title(title).is_err());
    }

    #[rstest]
    fn overlong_title_is_rejected() {
        let title = "x".repeat(MAX_TITLE_LENGTH + 1);

        assert!(sanitize_title(&title).is_err());
        assert!(sanitize_title(&"x".repeat(MAX_TITLE_LENGTH)).is_ok());
    }

    #[rstest]
    fn whitespace_comment_is_rejected() {
        assert!(sanitize_comment(" \t\n").is_err());
        assert_eq!(sanitize_comment(" ok ").ok(), Some(" ok ".to_owned()));
    }

    #[rstest]
    fn empty_branch_is_rejected() {
        assert!(require_branch("").is_err());
        assert_eq!(require_branch(" main ").ok(), Some("main"));
    }
}
