//! Shutdown protection for shared executors.

use std::fmt;
use std::sync::Arc;

use crate::close::CloseFuture;
use crate::error::SubmitError;
use crate::executor::Executor;
use crate::job::Job;

/// A proxy that lets a component use a shared executor without being able
/// to terminate it.
///
/// Every operation delegates to the wrapped executor except the close
/// family: a close request never reaches the wrapped pool and instead
/// resolves the proxy's own [`CloseFuture`], so `is_closed` answers "has
/// this handle been asked to close", never the wrapped pool's true state.
///
/// The proxy does not own the wrapped pool's lifecycle; whoever created the
/// pool remains responsible for closing it.
pub struct Protected {
    inner: Arc<dyn Executor>,
    close: CloseFuture,
}

/// Wrap `pool` so that close requests cannot reach it.
///
/// If `shutdown_on_exit` is `true` the caller is allowed to shut the pool
/// down, so no wrapping takes place and the original reference is returned.
/// Wrapping an executor that is already shutdown-protected is likewise a
/// no-op.
pub fn protect(pool: Arc<dyn Executor>, shutdown_on_exit: bool) -> Arc<dyn Executor> {
    if shutdown_on_exit || pool.is_shutdown_protected() {
        pool
    } else {
        Arc::new(Protected::new(pool))
    }
}

impl Protected {
    /// Wrap `pool` unconditionally. Prefer [`protect`], which applies the
    /// no-op construction rules.
    pub fn new(pool: Arc<dyn Executor>) -> Protected {
        Protected {
            inner: pool,
            close: CloseFuture::new(),
        }
    }
}

impl Executor for Protected {
    fn execute(&self, job: Job) -> Result<(), SubmitError> {
        self.inner.execute(job)
    }

    /// Resolve the proxy's own close future without touching the wrapped
    /// pool. Nothing is abandoned because nothing was stopped.
    fn close(&self, _immediate: bool) -> CloseFuture {
        self.close.set_closed();
        self.close.clone()
    }

    fn close_future(&self) -> CloseFuture {
        self.close.clone()
    }

    fn is_shutdown_protected(&self) -> bool {
        true
    }
}

impl fmt::Debug for Protected {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Protected")
            .field("state", &self.close.state())
            .finish()
    }
}
