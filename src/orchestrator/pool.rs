//! Fixed-size worker pool for plugin jobs.
//!
//! All specs are queued up front. `workers` tasks pull from the shared queue
//! and run one job to completion before taking the next, so at most
//! `workers` jobs are in flight. Outcomes are sent back over a channel and
//! surface as a stream in completion order.
//!
//! ```text
//!   VecDeque<PluginSpec>
//!         │ pop_front
//!   ┌─────┼─────────┬─────────┐
//!   ▼     ▼         ▼         ▼
//! worker worker   worker ... worker     (tokio tasks)
//!   │     │         │         │
//!   └─────┴────┬────┴─────────┘
//!              ▼
//!   mpsc::UnboundedSender<JobOutcome> ──► UnboundedReceiverStream
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

use crate::index::PluginSpec;
use crate::outcome::JobOutcome;

/// Runs jobs on a bounded number of tokio tasks.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool with `workers` workers. Values below 1 are clamped.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Starts running `job` for every spec and returns the outcome stream.
    ///
    /// Yields exactly one outcome per spec. A job that panics is reported as
    /// an `ERROR` outcome for its spec. Dropping the stream does not stop
    /// jobs that are already running; their outcomes are discarded.
    pub fn run<J, Fut>(&self, specs: Vec<PluginSpec>, job: J) -> UnboundedReceiverStream<JobOutcome>
    where
        J: Fn(PluginSpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = self.workers.min(specs.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(specs)));
        let job = Arc::new(job);

        debug!("Starting {} workers", workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);
            let tx = tx.clone();

            tokio::spawn(async move {
                loop {
                    let Some(spec) = queue.lock().await.pop_front() else {
                        break;
                    };

                    let start = Instant::now();
                    let pending = spec.clone();
                    let job = Arc::clone(&job);
                    let result = AssertUnwindSafe(async move { (*job)(pending).await })
                        .catch_unwind()
                        .await;

                    let outcome = match result {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            error!("Job for {} panicked: {}", spec, message);
                            let err = anyhow::anyhow!("job panicked: {}", message);
                            JobOutcome::error(spec, &err, start.elapsed())
                        }
                    };

                    if tx.send(outcome).is_err() {
                        debug!("Worker {}: outcome receiver dropped", worker);
                    }
                }
                debug!("Worker {} finished", worker);
            });
        }

        UnboundedReceiverStream::new(rx)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;

    use crate::outcome::{JobStatus, RunStatus, classify};

    fn specs(n: usize) -> Vec<PluginSpec> {
        (0..n)
            .map(|i| PluginSpec::new(format!("pytest-p{}", i), "1.0", ""))
            .collect()
    }

    fn pass(spec: PluginSpec) -> JobOutcome {
        classify(
            spec,
            RunStatus::Completed {
                exit_code: 0,
                output: String::new(),
            },
            Duration::ZERO,
        )
    }

    #[test]
    fn test_workers_clamped() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
        assert_eq!(WorkerPool::new(8).workers(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_outcome_per_spec() {
        for workers in [1, 3, 8] {
            let outcomes: Vec<JobOutcome> = WorkerPool::new(workers)
                .run(specs(10), |spec| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    pass(spec)
                })
                .collect()
                .await;

            assert_eq!(outcomes.len(), 10, "workers = {}", workers);
            let names: HashSet<&str> = outcomes.iter().map(|o| o.spec().name.as_str()).collect();
            assert_eq!(names.len(), 10);
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcomes: Vec<JobOutcome> = WorkerPool::new(4)
            .run(Vec::new(), |spec| async move { pass(spec) })
            .collect()
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let count = WorkerPool::new(3)
            .run(specs(12), move |spec| {
                let active = Arc::clone(&a);
                let peak = Arc::clone(&p);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    pass(spec)
                }
            })
            .count()
            .await;

        assert_eq!(count, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let outcomes: Vec<JobOutcome> = WorkerPool::new(2)
            .run(specs(3), |spec| async move {
                if spec.name == "pytest-p1" {
                    panic!("exploded while unpacking");
                }
                pass(spec)
            })
            .collect()
            .await;

        assert_eq!(outcomes.len(), 3);
        let failed = outcomes
            .iter()
            .find(|o| o.spec().name == "pytest-p1")
            .unwrap();
        assert_eq!(failed.status(), JobStatus::Error);
        assert!(failed.output().contains("exploded while unpacking"));
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| o.status() == JobStatus::Passed)
                .count(),
            2
        );
    }
}
