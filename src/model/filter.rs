//! Query filters for listings.

use super::{ActivityKind, PrincipalId, PullReqState, RepoId};

/// Default page size for pull request listings.
pub const DEFAULT_PAGE_SIZE: u32 = 30;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Column used to sort pull request listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullReqSort {
    /// Display number.
    #[default]
    Number,
    /// Creation time.
    Created,
    /// Last modification time.
    Updated,
}

impl PullReqSort {
    pub(crate) const fn column(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Created => "created_at",
            Self::Updated => "updated_at",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    pub(crate) const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter for listing pull requests of one target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReqFilter {
    /// Only these states; empty means all.
    pub states: Vec<PullReqState>,
    /// Only requests from this source repository.
    pub source_repo_id: Option<RepoId>,
    /// Only requests from this source branch.
    pub source_branch: Option<String>,
    /// Only requests into this target branch.
    pub target_branch: Option<String>,
    /// Only requests by this author.
    pub created_by: Option<PrincipalId>,
    /// Sort column.
    pub sort: PullReqSort,
    /// Sort direction.
    pub order: SortOrder,
    /// One-based page number.
    pub page: u32,
    /// Page size, clamped to [`MAX_PAGE_SIZE`].
    pub size: u32,
}

impl Default for PullReqFilter {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            source_repo_id: None,
            source_branch: None,
            target_branch: None,
            created_by: None,
            sort: PullReqSort::default(),
            order: SortOrder::default(),
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PullReqFilter {
    /// Effective page size.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Rows to skip for the requested page.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

/// Filter for reading a pull request timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    /// Only these kinds; empty means all.
    pub kinds: Vec<ActivityKind>,
    /// Include soft-deleted entries.
    pub include_deleted: bool,
    /// Only entries with an order strictly greater than this.
    pub after_order: Option<i64>,
    /// Maximum number of entries.
    pub limit: Option<u32>,
}
