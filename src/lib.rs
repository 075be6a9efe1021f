//! Pull request engine for a self-hosted source-control platform.
//!
//! The crate keeps the lifecycle of pull requests and gives every comment,
//! reply and system event a unique, strictly increasing position in the
//! request's timeline, even when many writers race on the same request. It
//! does so without any process-wide lock: positions are handed out by
//! conditional writes on a version column in `SQLite`, retried within a small
//! budget.
//!
//! Mutations are authorized through an [`auth::AuthorizationGate`] and branch
//! state is checked through a [`git::GitRefResolver`].

pub mod auth;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod git;
pub mod model;
pub mod persistence;
pub mod telemetry;

pub use config::{OperationMode, PullReqConfig, RefSource};
pub use engine::{
    CallContext, CommentInput, CreatePullRequest, EngineError, EngineParts, PullReqEngine,
};
