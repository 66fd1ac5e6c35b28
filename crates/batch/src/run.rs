use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

/// Processes `items` with `workers` concurrent tasks, calling `for_each` once per item.
///
/// Every call's result is sent on the returned channel, in completion order. The channel
/// closes once all workers have drained the input. With zero workers the returned channel is
/// already closed and no item is read.
///
/// Workers are spawned tasks, so this must be called within a tokio runtime. A worker whose
/// result cannot be delivered because the receiver was dropped stops pulling items.
pub fn run<T, E, F, Fut>(workers: usize, items: mpsc::Receiver<T>, for_each: F) -> mpsc::Receiver<Result<(), E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
{
    let (tx, rx) = mpsc::channel(workers.max(1));
    let items = Arc::new(Mutex::new(items));
    let for_each = Arc::new(for_each);

    for worker in 0..workers {
        let tx = tx.clone();
        let items = Arc::clone(&items);
        let for_each = Arc::clone(&for_each);

        tokio::spawn(async move {
            loop {
                // the lock is held only while waiting for the next item
                let next = items.lock().await.recv().await;
                let Some(item) = next else {
                    trace!(worker, "input drained, worker exits");
                    return;
                };

                if tx.send(for_each(item).await).await.is_err() {
                    debug!(worker, "results receiver dropped, worker exits");
                    return;
                }
            }
        });
    }

    rx
}
