use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Run `tasks` with at most `limit` of them in flight.
///
/// Tasks acquire permits in queue order (tokio's semaphore is fair), so the
/// next pending task starts as soon as any running one finishes. Outputs come
/// back in queue order; completion order is unspecified. Failures are part of
/// the output type and never cancel the batch.
pub async fn run_bounded<I, Fut>(tasks: I, limit: usize) -> Vec<Fut::Output>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let gated = tasks.into_iter().map(|task| {
        let semaphore = semaphore.clone();
        async move {
            // The semaphore is never closed, so acquire cannot fail.
            let _permit = semaphore.acquire().await.ok();
            task.await
        }
    });

    join_all(gated).await
}
