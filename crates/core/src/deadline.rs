//! The one timeout combinator every external call goes through.

use std::future::Future;
use std::time::Duration;

/// Races `fut` against `budget`. On expiry the operation counts as failed
/// with the caller-supplied error; the timer is owned entirely by this
/// combinator, so no call-site manages its own.
pub async fn with_deadline<F, T, E>(
    budget: Duration,
    on_timeout: impl FnOnce() -> E,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(res) => res,
        Err(_) => Err(on_timeout()),
    }
}
