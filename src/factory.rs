//! Worker-thread creation policy.

use std::fmt;
use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread;

use log::trace;

/// A deferred thread-creation operation, handed to a [`PrivilegedSpawn`]
/// hook to run under whatever elevated context the host requires.
pub type SpawnOp = Box<dyn FnOnce() -> io::Result<thread::JoinHandle<()>> + Send>;

/// Hook that brackets the actual thread creation.
///
/// Hosts with a security-restricted execution context can install one to run
/// thread creation under ambient privilege; the hook must invoke the
/// operation it is given exactly once and return its result. Without a hook,
/// thread creation is a direct call.
pub type PrivilegedSpawn = Arc<dyn Fn(SpawnOp) -> io::Result<thread::JoinHandle<()>> + Send + Sync>;

/// Policy for threads created on behalf of a pool.
///
/// Each factory instance owns a monotonically increasing counter starting at
/// one and names its threads `<prefix>-thread-<n>`, where the prefix is the
/// pool name with spaces replaced by hyphens. Counters are per-instance, so
/// pools never interfere with each other's numbering.
///
/// Created threads are detached: they never block process exit (the
/// equivalent of daemon threads) and run at the platform's default
/// scheduling priority regardless of the priority of the spawning context.
pub struct ThreadFactory {
    prefix: String,
    next_thread_id: AtomicUsize,
    privileged: Option<PrivilegedSpawn>,
}

impl ThreadFactory {
    /// Create a factory for the given pool name.
    pub fn new(pool_name: &str) -> ThreadFactory {
        ThreadFactory {
            prefix: format!("{}-thread-", pool_name.replace(' ', "-")),
            next_thread_id: AtomicUsize::new(1),
            privileged: None,
        }
    }

    /// Install a privileged-spawn hook.
    pub fn privileged_spawn(mut self, run: PrivilegedSpawn) -> ThreadFactory {
        self.privileged = Some(run);
        self
    }

    /// The name prefix applied to created threads, including the trailing
    /// `-thread-` separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Spawn a named worker thread running `f`.
    ///
    /// Errors from the host environment (e.g. thread limits) are returned
    /// unchanged; the caller decides what happens to the work that needed
    /// the thread.
    pub fn spawn<F>(&self, f: F) -> io::Result<thread::JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_thread_id.fetch_add(1, Relaxed);
        let name = format!("{}{}", self.prefix, id);

        trace!("spawning worker thread {}", name);

        let builder = thread::Builder::new().name(name);
        let op: SpawnOp = Box::new(move || builder.spawn(f));

        match &self.privileged {
            Some(run) => run(op),
            None => op(),
        }
    }
}

impl fmt::Debug for ThreadFactory {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadFactory")
            .field("prefix", &self.prefix)
            .field("privileged", &self.privileged.is_some())
            .finish()
    }
}
