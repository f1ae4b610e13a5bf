//! Mutual exclusion around a single shared external call.
//!
//! Jobs run in parallel, but the package download is funnelled through a
//! [`SingleResourceGate`] so that at most one download is in flight at any
//! time. Only the gated call is serialized; everything else a job does
//! (unpacking, running tox) proceeds concurrently.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::trace;

/// Runs closures one at a time.
///
/// The gate has no timeout: waiting jobs queue in FIFO order until the
/// current holder finishes. The gate is released on every exit path of the
/// closure, including errors and panics, because release is tied to the
/// guard's drop.
///
/// # Example
///
/// ```
/// use plugincompat::gate::SingleResourceGate;
///
/// # tokio_test::block_on(async {
/// let gate = SingleResourceGate::new();
/// let value = gate.acquire_and_run(|| async { 40 + 2 }).await;
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct SingleResourceGate {
    lock: Mutex<()>,
}

impl SingleResourceGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Waits for the gate, runs `f` exclusively, then releases the gate.
    ///
    /// Returns whatever `f` returns; a `Result` error is passed through to
    /// the caller after the gate is released.
    pub async fn acquire_and_run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock.lock().await;
        trace!("Gate acquired");
        let result = f().await;
        trace!("Gate released");
        result
    }

    /// Returns `true` if some job currently holds the gate.
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
