//! Per-key FIFO execution.
//!
//! Each key owns a chain of jobs: a job only starts once the job queued before
//! it for the same key has finished. Jobs for different keys run concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Tail of a key's chain: completion signal of the last queued job.
struct Tail {
    ticket: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
pub struct KeyedQueue {
    tails: Mutex<HashMap<String, Tail>>,
    next_ticket: AtomicU64,
}

impl KeyedQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends `job` to the chain for `key` and spawns it.
    ///
    /// Ordering is fixed at call time, so jobs for one key run in the order
    /// `enqueue` was called. A job that panics still releases the next one.
    pub fn enqueue<F>(self: &Arc<Self>, key: impl Into<String>, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();

        let previous = self
            .tails
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                Tail {
                    ticket,
                    done: done_rx,
                },
            )
            .map(|tail| tail.done);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err means the previous job panicked; the chain moves on.
                let _ = previous.await;
            }
            let _release = Release {
                queue,
                key,
                ticket,
            };
            job.await;
            let _ = done_tx.send(());
        })
    }

    /// Drops the chain entry if no job was queued after `ticket`.
    fn release(&self, key: &str, ticket: u64) {
        let mut tails = self.tails.lock().unwrap_or_else(PoisonError::into_inner);
        if tails.get(key).is_some_and(|tail| tail.ticket == ticket) {
            tails.remove(key);
        }
    }

    /// Number of keys with queued or running jobs.
    pub fn in_flight_keys(&self) -> usize {
        self.tails
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Drops the chain entry when the job ends, including by panic.
struct Release {
    queue: Arc<KeyedQueue>,
    key: String,
    ticket: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.queue.release(&self.key, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn test_same_key_runs_in_enqueue_order() {
        let queue = KeyedQueue::new();
        let log = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u64 {
            let log = Arc::clone(&log);
            // Earlier jobs sleep longer, so without chaining they would finish last.
            handles.push(queue.enqueue("ana@example.com", async move {
                tokio::time::sleep(Duration::from_millis(50 - i * 10)).await;
                log.lock().await.push(i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*log.lock().await, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.in_flight_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block_each_other() {
        let queue = KeyedQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocked = queue.enqueue("x@example.com", async move {
            let _ = release_rx.await;
        });
        let free = queue.enqueue("y@example.com", async {});

        tokio::time::timeout(Duration::from_secs(1), free)
            .await
            .expect("job for another key should not wait")
            .unwrap();
        assert_eq!(queue.in_flight_keys(), 1);

        release_tx.send(()).unwrap();
        blocked.await.unwrap();
        assert_eq!(queue.in_flight_keys(), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_releases_chain() {
        let queue = KeyedQueue::new();
        let ran = Arc::new(AsyncMutex::new(false));

        let first = queue.enqueue("k", async {
            panic!("boom");
        });
        let ran_clone = Arc::clone(&ran);
        let second = queue.enqueue("k", async move {
            *ran_clone.lock().await = true;
        });

        assert!(first.await.is_err());
        second.await.unwrap();
        assert!(*ran.lock().await);
    }
}
