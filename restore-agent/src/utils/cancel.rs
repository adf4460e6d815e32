//! Cooperative cancellation for suspension points.

use super::errors::{AgentError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Drive `fut` to completion unless `token` fires first.
///
/// Cancellation wins ties so a fired token is never masked by a ready future.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AgentError::Cancelled),
        result = fut => result,
    }
}
