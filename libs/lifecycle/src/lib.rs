//! # farm-lifecycle
//!
//! Run a background unit of work while giving the process well-defined,
//! race-free shutdown.
//!
//! The [`LifecycleExecutor`] holds a two-state machine (`running` →
//! `exiting`, terminal). Shutdown is requested explicitly with
//! [`LifecycleExecutor::trigger_shutdown`] (binaries wire OS signals to it
//! via [`listen_for_signals`]) and is observable by supervised tasks as a
//! `watch::Receiver<bool>`. A shutdown request does not stop the process
//! while a critical unit of work is inside an atomic section; after the last
//! section ends, a fixed settle delay elapses before [`LifecycleExecutor::run`]
//! returns.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info};

/// Default grace window after an atomic section ends.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Coordinates graceful shutdown across a process.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct LifecycleExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    exiting: watch::Sender<bool>,
    /// Number of atomic sections currently in flight.
    atomic: AtomicU32,
    /// Signaled whenever an atomic section ends.
    settled: Notify,
    settle_delay: Duration,
}

impl LifecycleExecutor {
    pub fn new(settle_delay: Duration) -> Self {
        let (exiting, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                exiting,
                atomic: AtomicU32::new(0),
                settled: Notify::new(),
                settle_delay,
            }),
        }
    }

    /// Transition to `exiting`. Idempotent; the transition is terminal.
    pub fn trigger_shutdown(&self) {
        if !*self.inner.exiting.borrow() {
            info!("Shutdown requested");
        }
        let _ = self.inner.exiting.send(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_exiting(&self) -> bool {
        *self.inner.exiting.borrow()
    }

    /// Subscribe to the shutdown flag.
    ///
    /// Supervised tasks await `changed()` on the receiver and drain when the
    /// value flips to `true`.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.exiting.subscribe()
    }

    /// Mark the currently executing unit of work as non-interruptible.
    pub fn begin_atomic(&self) {
        self.inner.atomic.fetch_add(1, Ordering::SeqCst);
    }

    /// Clear the non-interruptible mark.
    ///
    /// The settle delay is imposed by the shutdown path, so callers are not
    /// blocked here; shutdown still waits the full grace window after the
    /// last section ends.
    pub fn end_atomic(&self) {
        let previous = self.inner.atomic.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "end_atomic without matching begin_atomic");
        // notify_one stores a permit, so an end_atomic landing between the
        // shutdown loop's atomic check and its await is never lost.
        self.inner.settled.notify_one();
    }

    /// Launch `task` with a shutdown receiver and wait for a safe stop point.
    ///
    /// Returns once shutdown has been requested, no atomic section is in
    /// flight, and the settle delay has elapsed without a new section
    /// starting. The supervised task is detached; it is expected to observe
    /// its receiver and drain on its own.
    pub async fn run<F, Fut>(&self, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task(self.shutdown_signal()));

        let mut exiting = self.shutdown_signal();
        while !*exiting.borrow() {
            // The sender lives in `self.inner`, so `changed` cannot fail.
            if exiting.changed().await.is_err() {
                break;
            }
        }

        loop {
            let settled = self.inner.settled.notified();

            if self.inner.atomic.load(Ordering::SeqCst) > 0 {
                debug!("Shutdown deferred: atomic section in flight");
                settled.await;
                continue;
            }

            tokio::time::sleep(self.inner.settle_delay).await;

            if self.inner.atomic.load(Ordering::SeqCst) == 0 {
                break;
            }
        }

        info!("Shutdown settled");
    }
}

impl Default for LifecycleExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

/// Wire SIGINT/SIGTERM to the executor's shutdown flag.
///
/// Spawned as a background task so the executor itself stays free of
/// process-wide signal traps.
pub fn listen_for_signals(executor: &LifecycleExecutor) {
    let executor = executor.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt, initiating graceful shutdown");
        }

        executor.trigger_shutdown();
    });
}
