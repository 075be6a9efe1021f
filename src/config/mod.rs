//! Configuration for the `pullreq` binary, loaded from CLI, environment, and
//! files.
//!
//! # Precedence
//!
//! Values are merged with the following precedence (lowest to highest):
//!
//! 1. **Defaults** – built-in values
//! 2. **Configuration file** – `.pullreq.toml` in the current directory, home
//!    directory, or XDG config directory
//! 3. **Environment variables** – `PULLREQ_DATABASE_URL`, `PULLREQ_REPO`, ...
//! 4. **Command-line arguments** – `--database-url`, `--repo`/`-r`, ...
//!
//! # Configuration File
//!
//! ```toml
//! database_url = "pullreq.sqlite"
//! git_repos_root = "/srv/git"
//! sequence_retry_budget = 5
//! repo = "acme/widgets"
//! ```

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::EngineError;
use crate::persistence::{PersistenceError, RetryBudget};

/// What the binary does for a given configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// Apply pending migrations and exit.
    MigrateDatabase,
    /// Print the timeline of one pull request.
    ShowTimeline,
    /// List pull requests of one repository.
    ListPullRequests,
}

/// Where branch heads are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSource<'a> {
    /// Bare repositories under a local directory.
    Local(&'a str),
    /// A remote ref service.
    Rpc(Url),
}

/// Settings for the pull request engine and its command-line front end.
///
/// # Example
///
/// ```no_run
/// use ortho_config::OrthoConfig;
/// use pullreq::PullReqConfig;
///
/// let config = PullReqConfig::load().expect("failed to load configuration");
/// config.validate().expect("configuration should be consistent");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(
    prefix = "PULLREQ",
    discovery(
        dotfile_name = ".pullreq.toml",
        config_file_name = "pullreq.toml",
        app_name = "pullreq"
    )
)]
pub struct PullReqConfig {
    /// `SQLite` database path.
    ///
    /// Can be provided via:
    /// - CLI: `--database-url <PATH>`
    /// - Environment: `PULLREQ_DATABASE_URL`
    /// - Config file: `database_url = "..."`
    #[ortho_config()]
    pub database_url: Option<String>,

    /// Runs database migrations and exits.
    ///
    /// Can be provided via:
    /// - CLI: `--migrate-db`
    /// - Config file: `migrate_db = true`
    #[ortho_config()]
    pub migrate_db: bool,

    /// Base URL of the git ref service.
    #[ortho_config()]
    pub git_rpc_url: Option<String>,

    /// Directory holding bare repositories named `<git_uid>.git`.
    #[ortho_config()]
    pub git_repos_root: Option<String>,

    /// Timeout for a single ref lookup against the ref service.
    #[ortho_config()]
    pub git_rpc_timeout_seconds: u64,

    /// Retries allowed after a lost optimistic write before a conflict is
    /// reported.
    #[ortho_config()]
    pub sequence_retry_budget: u32,

    /// Repository path or ID to read from.
    ///
    /// Can be provided via:
    /// - CLI: `--repo <REPO>` or `-r <REPO>`
    /// - Environment: `PULLREQ_REPO`
    #[ortho_config(cli_short = 'r')]
    pub repo: Option<String>,

    /// Pull request number whose timeline is printed.
    ///
    /// Can be provided via:
    /// - CLI: `--number <N>` or `-n <N>`
    /// - Environment: `PULLREQ_NUMBER`
    #[ortho_config(cli_short = 'n')]
    pub number: Option<i64>,
}

const DEFAULT_GIT_RPC_TIMEOUT_SECONDS: u64 = 10;

impl Default for PullReqConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrate_db: false,
            git_rpc_url: None,
            git_repos_root: None,
            git_rpc_timeout_seconds: DEFAULT_GIT_RPC_TIMEOUT_SECONDS,
            sequence_retry_budget: RetryBudget::DEFAULT.max_retries(),
            repo: None,
            number: None,
        }
    }
}

fn configuration(message: impl Into<String>) -> EngineError {
    EngineError::Configuration {
        message: message.into(),
    }
}

impl PullReqConfig {
    /// Checks that the loaded values are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when both ref sources are set,
    /// the ref service URL is malformed, the timeout is zero, or a pull
    /// request number is given without a repository or is not positive.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.git_rpc_url.is_some() && self.git_repos_root.is_some() {
            return Err(configuration(
                "git_rpc_url and git_repos_root are mutually exclusive",
            ));
        }
        if let Some(raw) = &self.git_rpc_url {
            parse_rpc_url(raw)?;
        }
        if self.git_rpc_timeout_seconds == 0 {
            return Err(configuration(
                "git_rpc_timeout_seconds must be greater than zero",
            ));
        }
        match (self.repo.as_deref(), self.number) {
            (None, Some(_)) => Err(configuration(
                "a pull request number needs a repository (use --repo or -r)",
            )),
            (_, Some(number)) if number <= 0 => Err(configuration(
                "pull request number must be positive",
            )),
            _ => Ok(()),
        }
    }

    /// Determines what the binary should do.
    #[must_use]
    pub const fn operation_mode(&self) -> OperationMode {
        if self.migrate_db {
            OperationMode::MigrateDatabase
        } else if self.number.is_some() {
            OperationMode::ShowTimeline
        } else {
            OperationMode::ListPullRequests
        }
    }

    /// Returns the database URL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when no URL is configured.
    pub fn require_database_url(&self) -> Result<&str, EngineError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| configuration(PersistenceError::MissingDatabaseUrl.to_string()))
    }

    /// Returns the repository reference.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when no repository is configured.
    pub fn require_repo(&self) -> Result<&str, EngineError> {
        self.repo
            .as_deref()
            .filter(|repo| !repo.trim().is_empty())
            .ok_or_else(|| configuration("repository is required (use --repo or -r)"))
    }

    /// Returns the configured ref source.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when neither source is set or
    /// the service URL is malformed.
    pub fn ref_source(&self) -> Result<RefSource<'_>, EngineError> {
        match (self.git_repos_root.as_deref(), self.git_rpc_url.as_deref()) {
            (Some(root), None) => Ok(RefSource::Local(root)),
            (None, Some(raw)) => parse_rpc_url(raw).map(RefSource::Rpc),
            (Some(_), Some(_)) => Err(configuration(
                "git_rpc_url and git_repos_root are mutually exclusive",
            )),
            (None, None) => Err(configuration(
                "a ref source is required (set git_repos_root or git_rpc_url)",
            )),
        }
    }

    /// Timeout for one ref service call.
    #[must_use]
    pub const fn git_rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.git_rpc_timeout_seconds)
    }

    /// Retry budget for optimistic writes.
    #[must_use]
    pub const fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.sequence_retry_budget)
    }
}

fn parse_rpc_url(raw: &str) -> Result<Url, EngineError> {
    Url::parse(raw).map_err(|error| configuration(format!("invalid git_rpc_url '{raw}': {error}")))
}
