//! Per-document operation lanes.
//!
//! Each document name owns an ordered queue of asynchronous operations:
//! one lane worker drains jobs strictly in submission order, so append,
//! replay, and compaction never interleave for the same document, while
//! distinct documents proceed fully in parallel. Lanes are created on
//! demand and torn down as soon as their queue drains, so idle documents
//! cost nothing.

use std::{
    future::Future,
    pin::Pin,
    sync::{Mutex, PoisonError},
};

use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The lane worker disappeared before the operation could report back.
///
/// Only observable after shutdown or a panicked job; ordinary operation
/// failures travel through their own reply channel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneClosed;

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    /// Queued plus in-flight jobs; mutated only under the map lock.
    pending: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

/// Map from document name to its active lane.
#[derive(Clone, Default)]
pub struct DocLanes {
    inner: std::sync::Arc<LaneMap>,
}

#[derive(Default)]
struct LaneMap {
    lanes: Mutex<HashMap<String, Lane>>,
}

impl DocLanes {
    /// Creates an empty lane set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fut` once every earlier operation queued for `key` has
    /// finished, and returns its output.
    ///
    /// The job is enqueued before this returns, so per-key ordering
    /// follows call order, not the order the returned futures happen to
    /// be polled in. A failed or panicked predecessor never stalls the
    /// lane: the worker advances to the next job regardless, and each
    /// caller observes only its own operation's outcome.
    pub fn run<T, F>(&self, key: &str, fut: F) -> impl Future<Output = Result<T, LaneClosed>> + use<T, F>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(fut.await);
        });
        let queued = self.enqueue(key, job);
        async move {
            queued?;
            rx.await.map_err(|_| LaneClosed)
        }
    }

    /// Number of live lanes. Test observability hook.
    pub fn active_lanes(&self) -> usize {
        lock_recovering(&self.inner.lanes).len()
    }

    fn enqueue(&self, key: &str, job: Job) -> Result<(), LaneClosed> {
        use std::sync::atomic::Ordering;

        let mut lanes = lock_recovering(&self.inner.lanes);
        let lane = lanes
            .entry(key.to_string())
            .or_insert_with(|| self.spawn_lane(key.to_string()));
        lane.pending.fetch_add(1, Ordering::SeqCst);
        // A lane is only torn down when its pending count reaches zero
        // under this same lock, so a live map entry has a live receiver.
        lane.tx.send(job).map_err(|_| LaneClosed)
    }

    fn spawn_lane(&self, key: String) -> Lane {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = std::sync::Arc::new(AtomicUsize::new(0));

        let worker_pending = std::sync::Arc::clone(&pending);
        let map = std::sync::Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                let mut lanes = lock_recovering(&map.lanes);
                if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    // Drained with nothing queued behind us: evict. The
                    // sender drops with the entry, ending this worker on
                    // the next recv.
                    lanes.remove(&key);
                }
            }
        });

        Lane { tx, pending }
    }
}

/// No user code ever runs while the map lock is held, so a poisoned lock
/// still guards a consistent map; continue with the inner value.
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn single_lane_runs_jobs_in_submission_order() {
        let lanes = DocLanes::new();
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));

        // run() enqueues at call time, so this loop fixes the order even
        // though the replies are awaited later.
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let log = std::sync::Arc::clone(&log);
            handles.push(lanes.run("doc", async move {
                // Earlier jobs sleeping must not let later jobs overtake.
                if i % 3 == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                log.lock().expect("lock").push(i);
            }));
        }
        for h in handles {
            h.await.expect("lane");
        }

        let seen = log.lock().expect("lock").clone();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let lanes = DocLanes::new();
        let (tx, rx) = oneshot::channel::<()>();

        // Park lane "slow" until released.
        let slow = tokio::spawn({
            let lanes = lanes.clone();
            async move {
                lanes
                    .run("slow", async move {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        // Lane "fast" completes while "slow" is parked.
        let out = tokio::time::timeout(
            Duration::from_secs(1),
            lanes.run("fast", async { 7u32 }),
        )
        .await
        .expect("fast lane starved")
        .expect("lane");
        assert_eq!(out, 7);

        tx.send(()).expect("release");
        slow.await.expect("join").expect("lane");
    }

    #[tokio::test]
    async fn drained_lanes_are_evicted() {
        let lanes = DocLanes::new();
        for i in 0..4 {
            lanes
                .run(&format!("doc-{i}"), async {})
                .await
                .expect("lane");
        }
        // Eviction happens right after the last job completes, before the
        // reply is observed awaitable-ordering-wise; poll briefly.
        for _ in 0..50 {
            if lanes.active_lanes() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("idle lanes were not evicted: {}", lanes.active_lanes());
    }

    #[tokio::test]
    async fn failure_does_not_stall_the_chain() {
        let lanes = DocLanes::new();
        let err: Result<u32, &str> = lanes.run("doc", async { Err("boom") }).await.expect("lane");
        assert_eq!(err, Err("boom"));

        let ok: Result<u32, &str> = lanes.run("doc", async { Ok(3) }).await.expect("lane");
        assert_eq!(ok, Ok(3));
    }
}
