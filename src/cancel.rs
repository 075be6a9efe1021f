//! Cancellation-aware futures.
//!
//! Every collaborator call made by the engine races against the caller's
//! [`CancellationToken`]. A store call that already reached the database
//! finishes atomically on its blocking thread; only the wait is abandoned.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when the token fires before the future completes.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Extension trait racing a future against a [`CancellationToken`].
#[async_trait]
pub trait OrCancelExt: Sized {
    /// Output of the wrapped future.
    type Output;

    /// Returns `Ok(output)` if the future completes first, or
    /// `Err(Cancelled)` if the token is cancelled.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(Cancelled),
            output = self => Ok(output),
        }
    }
}
