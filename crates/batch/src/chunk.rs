use std::future::Future;
use std::num::NonZeroUsize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Groups `items` into buckets of `size` and calls `exec` once per full bucket.
///
/// When the input closes, a trailing partial bucket is passed to `exec` as well. Each call's
/// result is sent on the returned channel, which closes after the last one. No items means no
/// calls. Buckets are processed one at a time, in arrival order.
///
/// The work runs on a spawned task, so this must be called within a tokio runtime. If the
/// returned receiver is dropped the task stops after the bucket in flight.
pub fn chunk<T, E, F, Fut>(size: NonZeroUsize, mut items: mpsc::Receiver<T>, mut exec: F) -> mpsc::Receiver<Result<(), E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut(Vec<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
{
    let (tx, rx) = mpsc::channel(1);
    let size = size.get();

    tokio::spawn(async move {
        let mut bucket = Vec::with_capacity(size);

        while let Some(item) = items.recv().await {
            bucket.push(item);
            if bucket.len() < size {
                continue;
            }

            let full = std::mem::replace(&mut bucket, Vec::with_capacity(size));
            trace!(size, "executing full chunk");
            if tx.send(exec(full).await).await.is_err() {
                debug!("chunk results receiver dropped, stop chunking");
                return;
            }
        }

        if !bucket.is_empty() {
            trace!(size = bucket.len(), "executing trailing chunk");
            if tx.send(exec(bucket).await).await.is_err() {
                debug!("chunk results receiver dropped, trailing chunk result discarded");
            }
        }
    });

    rx
}
