//! Bounded worker pools with caller-runs back-pressure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::config::{PoolConfig, PoolSizes};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A named pool of background workers over a bounded queue.
///
/// Concurrency is capped by a semaphore shared with [`WorkerPool::throttle`].
/// When the queue is full, `submit` runs the job inline on the submitting
/// task, which naturally slows producers.
pub struct WorkerPool {
    name: &'static str,
    tx: mpsc::Sender<Job>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates the pool and spawns its dispatcher.
    pub fn new(name: &'static str, sizes: PoolSizes) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(sizes.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(sizes.max_concurrency.max(1)));

        let dispatcher_semaphore = Arc::clone(&semaphore);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = match Arc::clone(&dispatcher_semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    job.await;
                    drop(permit);
                });
            }
        });

        Self {
            name,
            tx,
            semaphore,
        }
    }

    /// Enqueues a job for background execution.
    ///
    /// A full queue applies back-pressure: the job runs inline before
    /// `submit` returns.
    pub async fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.try_send(Box::pin(job)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(pool = self.name, "queue full, running task on the submitter");
                job.await;
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                job.await;
            }
        }
    }

    /// Runs `fut` inline under this pool's concurrency cap.
    ///
    /// Used by the engine around step executor invocations so step
    /// concurrency across sagas is bounded without detaching the work.
    pub async fn throttle<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        // The semaphore is never closed while the pool is alive.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("worker pool semaphore closed");
        fut.await
    }

    /// Currently available concurrency slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// The engine's three pools.
pub struct WorkerPools {
    pub saga_exec: WorkerPool,
    pub step_exec: WorkerPool,
    pub compensation: WorkerPool,
}

impl WorkerPools {
    /// Creates the pools with the configured sizes.
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            saga_exec: WorkerPool::new("saga-exec", config.saga_exec),
            step_exec: WorkerPool::new("step-exec", config.step_exec),
            compensation: WorkerPool::new("compensation", config.compensation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submitted_jobs_run() {
        let pool = WorkerPool::new(
            "test",
            PoolSizes {
                max_concurrency: 4,
                queue_capacity: 16,
            },
        );
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs did not finish");
    }

    #[tokio::test]
    async fn full_queue_runs_caller_inline() {
        // One worker slot held busy, capacity-1 queue: the second submit
        // must complete inline before returning.
        let pool = WorkerPool::new(
            "test",
            PoolSizes {
                max_concurrency: 1,
                queue_capacity: 1,
            },
        );

        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;
        // Give the dispatcher a moment to move the blocker out of the queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;

        let ran_inline = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran_inline);
        pool.submit(async move {
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        // The inline job finished during submit even though the worker is busy.
        assert_eq!(ran_inline.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn throttle_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(
            "test",
            PoolSizes {
                max_concurrency: 2,
                queue_capacity: 16,
            },
        ));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                pool.throttle(async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
