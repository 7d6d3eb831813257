//! The executor contract shared by pools and their proxies.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Duration;

use crate::close::{CloseFuture, CloseListener, WaitOutcome};
use crate::error::{JobError, SubmitError};
use crate::job::{self, Job, JobHandle};

/// The full worker-pool contract: submission plus the close family.
///
/// [`ThreadPool`](crate::ThreadPool) implements it directly;
/// [`Protected`](crate::Protected) implements it by delegating everything
/// except the close family, which it resolves against its own
/// [`CloseFuture`]. The trait is object safe so pools can be shared as
/// `Arc<dyn Executor>`; the generic conveniences live on
/// [`ExecutorExt`].
pub trait Executor: Send + Sync {
    /// Submit a single type-erased job.
    fn execute(&self, job: Job) -> Result<(), SubmitError>;

    /// Request a close and return the close future that will reach `Closed`
    /// when the executor has fully stopped.
    ///
    /// Graceful (`immediate == false`): no new work is accepted, queued jobs
    /// drain and running jobs finish. Immediate: queued jobs are abandoned
    /// and workers exit after their current job. Either way this returns
    /// after *requesting* the close; callers that need to observe completion
    /// wait on the returned future.
    fn close(&self, immediate: bool) -> CloseFuture;

    /// The close future bound to this executor's lifecycle.
    fn close_future(&self) -> CloseFuture;

    /// Returns `true` once the executor has fully stopped.
    fn is_closed(&self) -> bool {
        self.close_future().is_closed()
    }

    /// Returns `true` once a close has been requested, including after it
    /// completed.
    fn is_closing(&self) -> bool {
        self.close_future().is_closing()
    }

    /// Block until the executor has fully stopped.
    fn await_closed(&self) -> WaitOutcome {
        self.close_future().await_closed()
    }

    /// Block until the executor has fully stopped or `timeout` elapses.
    fn await_closed_timeout(&self, timeout: Duration) -> WaitOutcome {
        self.close_future().await_closed_timeout(timeout)
    }

    /// Register a listener on this executor's close future.
    fn add_close_listener(&self, listener: &CloseListener) {
        self.close_future().add_listener(listener);
    }

    /// Remove a listener from this executor's close future.
    fn remove_close_listener(&self, listener: &CloseListener) {
        self.close_future().remove_listener(listener);
    }

    /// Returns `true` for proxies that swallow close requests instead of
    /// forwarding them. Used by [`protect`](crate::protect) to avoid
    /// double-wrapping.
    fn is_shutdown_protected(&self) -> bool {
        false
    }
}

/// Result-bearing submission helpers, available on every [`Executor`]
/// including trait objects.
pub trait ExecutorExt: Executor {
    /// Submit a closure and receive a handle to its eventual result.
    fn submit<F, R>(&self, f: F) -> Result<JobHandle<R>, SubmitError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (job, handle) = job::package(f);
        self.execute(job)?;
        Ok(handle)
    }

    /// Submit a batch and wait for every task to finish.
    ///
    /// Results are returned in submission order. Fails fast on the first
    /// submission the executor refuses; tasks submitted before that point
    /// still run.
    fn invoke_all<F, R>(&self, tasks: Vec<F>) -> Result<Vec<Result<R, JobError>>, SubmitError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut handles = Vec::with_capacity(tasks.len());

        for f in tasks {
            handles.push(self.submit(f)?);
        }

        Ok(handles.iter().map(|handle| handle.wait()).collect())
    }

    /// Submit a batch and return the result of the first task that
    /// completes without panicking.
    ///
    /// Remaining tasks are not cancelled; they run to completion and their
    /// results are discarded. Fails with the last observed error if no task
    /// succeeds (or with [`JobError::Abandoned`] if nothing could be
    /// submitted at all).
    fn invoke_any<F, R>(&self, tasks: Vec<F>) -> Result<R, JobError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let mut submitted = 0;

        for f in tasks {
            let tx = tx.clone();
            let job: Job = Box::new(move || {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| JobError::Panicked);
                let _ = tx.send(result);
            });

            if self.execute(job).is_ok() {
                submitted += 1;
            }
        }

        drop(tx);

        let mut last = JobError::Abandoned;

        for _ in 0..submitted {
            match rx.recv() {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => last = err,
                // A job was dropped unrun; nothing further will arrive
                Err(_) => break,
            }
        }

        Err(last)
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}
