//! Asynchronous close notification.
//!
//! A [`CloseFuture`] represents "this resource is closing / has closed". The
//! resource owner holds one and drives it; any number of observers may
//! register listeners, poll the state, or block until the resource has fully
//! closed. The state only ever moves forward: `Open` to `Closing` to
//! `Closed`, or `Open` straight to `Closed`.

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

/// A callback invoked exactly once when the resource reaches `Closed`.
///
/// Listeners are compared by `Arc` identity: registering the same `Arc`
/// twice is a no-op, and removal only matches the exact `Arc` that was
/// registered.
pub type CloseListener = Arc<dyn Fn() + Send + Sync>;

/// Close-notification state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseState {
    /// The resource is fully operational.
    Open,
    /// A close has been requested; the owner may still be finishing work.
    Closing,
    /// The resource has fully closed. Terminal.
    Closed,
}

/// Outcome of a timed wait for `Closed`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The resource closed while the caller was waiting.
    Closed,
    /// The deadline elapsed first.
    TimedOut,
    /// The resource was already closed when the wait started.
    AlreadyClosed,
}

/// Shareable close-notification handle.
///
/// Cloning is cheap and every clone observes the same state. The type is
/// safe under concurrent access from any number of threads; listener
/// callbacks always run outside the internal lock, so a callback may call
/// back into the future (to unregister itself, query state, or register
/// another listener) without deadlocking.
#[derive(Clone)]
pub struct CloseFuture {
    inner: Arc<Shared>,
}

struct Shared {
    guarded: Mutex<Guarded>,
    closed_signal: Condvar,
}

struct Guarded {
    state: CloseState,
    // Insertion order is notification order
    listeners: Vec<CloseListener>,
}

impl CloseFuture {
    /// Create a future in the `Open` state.
    pub fn new() -> CloseFuture {
        CloseFuture {
            inner: Arc::new(Shared {
                guarded: Mutex::new(Guarded {
                    state: CloseState::Open,
                    listeners: Vec::new(),
                }),
                closed_signal: Condvar::new(),
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CloseState {
        self.inner.guarded.lock().unwrap().state
    }

    /// Returns `true` once the resource has fully closed.
    pub fn is_closed(&self) -> bool {
        self.state() == CloseState::Closed
    }

    /// Returns `true` once a close has been requested, including after the
    /// close has completed.
    pub fn is_closing(&self) -> bool {
        self.state() != CloseState::Open
    }

    /// Record that a close has been requested.
    ///
    /// Moves `Open` to `Closing`; a no-op in any other state. How pending
    /// work is drained is the owner's concern; only the owner's
    /// [`set_closed`](CloseFuture::set_closed) performs the final
    /// transition.
    pub fn request_close(&self) {
        let mut guarded = self.inner.guarded.lock().unwrap();

        if guarded.state == CloseState::Open {
            guarded.state = CloseState::Closing;
        }
    }

    /// Transition to `Closed`, releasing all waiters and notifying all
    /// registered listeners in registration order.
    ///
    /// Idempotent: under concurrent invocation exactly one caller performs
    /// the transition and runs the listeners; the rest observe `Closed` and
    /// return `false`.
    pub fn set_closed(&self) -> bool {
        let fired = {
            let mut guarded = self.inner.guarded.lock().unwrap();

            if guarded.state == CloseState::Closed {
                return false;
            }

            guarded.state = CloseState::Closed;
            mem::take(&mut guarded.listeners)
        };

        self.inner.closed_signal.notify_all();

        for listener in &fired {
            Self::notify(listener);
        }

        true
    }

    /// Register a close listener.
    ///
    /// If the future is already closed the listener is notified immediately,
    /// on the calling thread, before this method returns. Registering a
    /// listener that is already present (same `Arc`) is a no-op.
    pub fn add_listener(&self, listener: &CloseListener) {
        {
            let mut guarded = self.inner.guarded.lock().unwrap();

            if guarded.state != CloseState::Closed {
                let present = guarded
                    .listeners
                    .iter()
                    .any(|existing| Arc::ptr_eq(existing, listener));

                if !present {
                    guarded.listeners.push(listener.clone());
                }

                return;
            }
        }

        // Already closed; notify outside the lock
        Self::notify(listener);
    }

    /// Remove a previously registered listener, matched by `Arc` identity.
    ///
    /// A no-op if the listener is absent or has already been notified.
    pub fn remove_listener(&self, listener: &CloseListener) {
        let mut guarded = self.inner.guarded.lock().unwrap();

        guarded
            .listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Block the calling thread until the resource has closed.
    ///
    /// Returns `AlreadyClosed` if no wait was necessary.
    pub fn await_closed(&self) -> WaitOutcome {
        let mut guarded = self.inner.guarded.lock().unwrap();

        if guarded.state == CloseState::Closed {
            return WaitOutcome::AlreadyClosed;
        }

        while guarded.state != CloseState::Closed {
            guarded = self.inner.closed_signal.wait(guarded).unwrap();
        }

        WaitOutcome::Closed
    }

    /// Block the calling thread until the resource has closed or `timeout`
    /// elapses.
    ///
    /// A zero timeout checks the state without blocking.
    pub fn await_closed_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut guarded = self.inner.guarded.lock().unwrap();

        if guarded.state == CloseState::Closed {
            return WaitOutcome::AlreadyClosed;
        }

        loop {
            let now = Instant::now();

            if now >= deadline {
                return WaitOutcome::TimedOut;
            }

            let (next, _) = self
                .inner
                .closed_signal
                .wait_timeout(guarded, deadline - now)
                .unwrap();
            guarded = next;

            if guarded.state == CloseState::Closed {
                return WaitOutcome::Closed;
            }
        }
    }

    // A listener panic must not prevent other listeners from running or
    // corrupt the Closed transition
    fn notify(listener: &CloseListener) {
        if panic::catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
            warn!("close listener panicked");
        }
    }
}

impl Default for CloseFuture {
    fn default() -> CloseFuture {
        CloseFuture::new()
    }
}

impl fmt::Debug for CloseFuture {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("CloseFuture")
            .field("state", &self.state())
            .finish()
    }
}
