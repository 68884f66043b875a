use futures_util::stream::{self, StreamExt};
use std::future::Future;

/// Runs `worker` over `items` with at most `limit` calls in flight.
///
/// `out[i]` always belongs to `items[i]`, whatever order the calls finish in.
/// Worker failures are the worker's business: return a `Result` or a
/// placeholder value if one item must not sink the batch.
pub async fn map_limit<T, R, F, Fut>(items: Vec<T>, limit: usize, worker: F) -> Vec<R>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = R>,
{
    let len = items.len();
    let mut indexed: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(idx, item)| {
            let call = worker(item, idx);
            async move { (idx, call.await) }
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await;
    debug_assert_eq!(indexed.len(), len);
    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, out)| out).collect()
}
