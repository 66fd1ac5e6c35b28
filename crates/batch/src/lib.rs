//! Helpers for processing a stream of items in bounded batches or with a bounded number of
//! concurrent workers.
//!
//! Both [`chunk`] and [`run`] consume a tokio [`mpsc::Receiver`](tokio::sync::mpsc::Receiver)
//! and hand back another one carrying a result per unit of work. The returned channel closes
//! once the input is closed and fully drained, so callers simply read it to the end:
//!
//! ```
//! use micro_batch::run;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (tx, rx) = mpsc::channel(8);
//! tokio::spawn(async move {
//!     for i in 0..8u32 {
//!         tx.send(i).await.unwrap();
//!     }
//! });
//!
//! let mut results = run(4, rx, |i: u32| async move { if i % 2 == 0 { Ok(()) } else { Err(i) } });
//!
//! let mut failed = vec![];
//! while let Some(result) = results.recv().await {
//!     if let Err(i) = result {
//!         failed.push(i);
//!     }
//! }
//! failed.sort_unstable();
//! assert_eq!(failed, [1, 3, 5, 7]);
//! # }
//! ```

mod chunk;
mod reduce;
mod run;

pub use chunk::chunk;
pub use reduce::reduce;
pub use run::run;
