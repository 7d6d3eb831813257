//! Execute jobs on a pool of worker threads whose shutdown is observable.
//!
//! A thread pool contains a set of previously spawned threads enabling
//! running jobs in parallel without having to spawn a new thread for each
//! job. Beyond the usual submission surface, every pool in this crate binds
//! its lifecycle to a [`CloseFuture`]: a small state machine (`Open`,
//! `Closing`, `Closed`) that observers can poll, block on with or without a
//! timeout, or subscribe to with listeners, so components learn about
//! termination without having to park a thread on a blocking wait.
//!
//! Two shutdown disciplines are supported. A graceful close
//! ([`Executor::close`] with `immediate == false`) stops intake, lets the
//! queue drain and running jobs finish; an immediate close abandons
//! queued-but-unstarted jobs and stops the workers as soon as their current
//! job ends. In both cases the bound close future reaches `Closed` exactly
//! when the last worker has exited, never earlier.
//!
//! When a pool is shared between components that must not be able to shut
//! it down, wrap it with [`protect`]: the resulting handle forwards work to
//! the pool but resolves close requests against its own close future,
//! leaving the pool untouched.
//!
//! Worker threads are created through a [`ThreadFactory`], which names them
//! `<pool>-thread-<n>` with a per-pool counter, leaves them detached so
//! they never block process exit, and can route the actual spawn through a
//! privileged hook on hosts that require one.
//!
//! Pools are configured through [`Builder`]: core and maximum sizes,
//! keep-alive for excess idle threads, queue capacity (unbounded, bounded,
//! or zero for direct handoff) and a pluggable [`RejectionPolicy`] whose
//! default runs rejected jobs on the submitting thread rather than dropping
//! them. The [`fixed_size`](ThreadPool::fixed_size),
//! [`single_thread`](ThreadPool::single_thread) and
//! [`cached`](ThreadPool::cached) constructors preconfigure the common
//! shapes.

#![deny(missing_docs, missing_debug_implementations)]

mod close;
mod error;
mod executor;
mod factory;
mod job;
mod protect;
mod state;
mod thread_pool;

pub use close::{CloseFuture, CloseListener, CloseState, WaitOutcome};
pub use error::{JobError, SubmitError};
pub use executor::{Executor, ExecutorExt};
pub use factory::{PrivilegedSpawn, SpawnOp, ThreadFactory};
pub use job::{Job, JobHandle};
pub use protect::{protect, Protected};
pub use thread_pool::{Abort, Builder, CallerRuns, RejectionPolicy, ThreadPool};
