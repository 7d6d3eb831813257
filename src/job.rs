use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::error::JobError;

/// A type-erased unit of work.
///
/// Executors run jobs of this single shape; the result-bearing submission
/// helpers in [`ExecutorExt`](crate::ExecutorExt) wrap a caller's closure
/// into a `Job` that routes its outcome to a [`JobHandle`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Receives the result of a single submitted job.
pub struct JobHandle<R> {
    rx: Receiver<Result<R, JobError>>,
}

/// Package a result-producing closure as a `Job` plus the handle that will
/// observe its outcome. Panics in the closure are caught and surface as
/// [`JobError::Panicked`]; if the job is dropped unrun (immediate close),
/// the handle observes [`JobError::Abandoned`].
pub(crate) fn package<F, R>(f: F) -> (Job, JobHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    let job: Job = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| JobError::Panicked);
        let _ = tx.send(result);
    });

    (job, JobHandle { rx })
}

impl<R> JobHandle<R> {
    /// Block until the job's result is available.
    ///
    /// The result is delivered once; a second wait on the same handle
    /// observes `Abandoned`.
    pub fn wait(&self) -> Result<R, JobError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(JobError::Abandoned),
        }
    }

    /// Block until the job's result is available or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<R, JobError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(JobError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(JobError::Abandoned),
        }
    }
}

impl<R> fmt::Debug for JobHandle<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("JobHandle").finish()
    }
}
