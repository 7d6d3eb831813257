use std::io;

use thiserror::Error;

/// Error returned when an executor refuses a submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The executor has been asked to close (or has already closed) and no
    /// longer accepts work.
    #[error("executor is closed")]
    Closed,

    /// The work queue is full, the pool is at its maximum size and the
    /// active rejection policy does not accept new work.
    #[error("work queue is full")]
    Rejected,

    /// The host environment refused to create a worker thread. The job was
    /// handed to the rejection policy first; this error surfaces only when
    /// the policy declined to run it.
    #[error("failed to spawn a worker thread")]
    Spawn(#[source] io::Error),
}

/// Error observed while waiting on a [`JobHandle`](crate::JobHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job body panicked.
    #[error("job panicked")]
    Panicked,

    /// The job was discarded before it ran, e.g. by an immediate close.
    #[error("job was abandoned before it ran")]
    Abandoned,

    /// The wait deadline elapsed before a result arrived. The job may still
    /// be queued or running; this is a boundary condition, not a failure of
    /// the job itself.
    #[error("timed out waiting for the job result")]
    Timeout,
}
