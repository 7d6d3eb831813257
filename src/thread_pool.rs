use crate::close::CloseFuture;
use crate::error::SubmitError;
use crate::executor::Executor;
use crate::factory::ThreadFactory;
use crate::job::Job;
use crate::state::{AtomicState, Lifecycle, CAPACITY};

use log::warn;
use two_lock_queue::{self as mpmc, RecvTimeoutError, TrySendError};

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A worker pool whose termination is observable through a bound
/// [`CloseFuture`].
///
/// The pool mirrors a standard worker pool (submit a single job, a batch
/// to wait on, or a batch racing for the first success) and adds graceful
/// versus immediate close as first-class operations. The close future
/// reaches `Closed` exactly when the pool has truly stopped doing work: the
/// last exiting worker performs the transition, so listeners and waiters
/// never observe `Closed` early.
///
/// For more details, see the [library level documentation](./index.html).
pub struct ThreadPool {
    inner: Arc<Inner>,
}

/// Thread pool configuration.
///
/// Provides detailed control over the properties and behavior of the thread
/// pool.
pub struct Builder {
    core_pool_size: usize,
    max_pool_size: usize,
    keep_alive: Option<Duration>,
    allow_core_thread_timeout: bool,
    factory: Option<ThreadFactory>,
    name: String,
    rejection: Arc<dyn RejectionPolicy>,

    // Max number of jobs that can be pending in the work queue. Zero means
    // direct handoff: nothing buffers, every submission either goes straight
    // to a (possibly new) worker or to the rejection policy.
    queue_capacity: usize,
}

/// Decides what happens to a job the pool cannot queue or hand to a new
/// worker.
///
/// The policy only sees jobs rejected for capacity reasons; submissions to a
/// closed pool always fail with [`SubmitError::Closed`] without consulting
/// the policy, so no job submitted after a close request is ever executed
/// through it.
pub trait RejectionPolicy: Send + Sync {
    /// Handle a rejected job.
    fn rejected(&self, job: Job) -> Result<(), SubmitError>;
}

/// Default policy: execute the rejected job synchronously on the submitting
/// thread, trading submitter latency for backpressure instead of dropped
/// work.
#[derive(Debug)]
pub struct CallerRuns;

impl RejectionPolicy for CallerRuns {
    fn rejected(&self, job: Job) -> Result<(), SubmitError> {
        job();
        Ok(())
    }
}

/// Policy that surfaces rejection to the submitter as
/// [`SubmitError::Rejected`].
#[derive(Debug)]
pub struct Abort;

impl RejectionPolicy for Abort {
    fn rejected(&self, _job: Job) -> Result<(), SubmitError> {
        Err(SubmitError::Rejected)
    }
}

struct Config {
    core_pool_size: usize,
    max_pool_size: usize,
    keep_alive: Option<Duration>,
    allow_core_thread_timeout: bool,
    direct_handoff: bool,
    factory: ThreadFactory,
    rejection: Arc<dyn RejectionPolicy>,
}

struct Inner {
    // The main pool control state is an atomic integer packing two
    // conceptual fields
    //   worker_count: the number of workers permitted to start and not
    //                 permitted to stop
    //   lifecycle:    Running / Stop / Tidying / Terminated
    //
    // The graceful-close phase ("don't accept new work, keep draining") has
    // no lifecycle value of its own; it is tracked by the work queue being
    // closed while the lifecycle is still Running. Terminal-state detection
    // therefore needs both signals: a worker that decrements the count to
    // zero only finalizes the pool if the queue is closed.
    state: AtomicState,

    // Submission side of the work queue
    tx: mpmc::Sender<Job>,

    // Used to keep the work channel open even if there are no running
    // threads. This handle is cloned when spawning new workers.
    rx: mpmc::Receiver<Job>,

    // Reaches Closed exactly once, from the finalize path
    close: CloseFuture,

    config: Config,
}

// Outcome of trying to start a worker
enum AddWorker {
    Added,
    // At capacity, or the lifecycle no longer allows new workers. Carries
    // the initial job back to the caller.
    Saturated(Option<Job>),
    // The host refused to create the thread
    Failed(Option<Job>, io::Error),
}

impl Clone for ThreadPool {
    fn clone(&self) -> ThreadPool {
        ThreadPool {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadPool")
            .field("state", &self.inner.close.state())
            .finish()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Builder")
            .field("core_pool_size", &self.core_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("keep_alive", &self.keep_alive)
            .field("allow_core_thread_timeout", &self.allow_core_thread_timeout)
            .field("name", &self.name)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// Tracks state associated with a worker thread
struct Worker {
    // Work queue receive handle
    rx: mpmc::Receiver<Job>,
    // Shared thread pool state
    inner: Arc<Inner>,
}

// ===== impl Builder =====

impl Builder {
    /// Returns a builder with default values: one core and maximum worker
    /// per CPU, an unbounded queue, no keep-alive, and the caller-runs
    /// rejection policy.
    pub fn new() -> Builder {
        let num_cpus = num_cpus::get();

        Builder {
            core_pool_size: num_cpus,
            max_pool_size: num_cpus,
            keep_alive: None,
            allow_core_thread_timeout: false,
            factory: None,
            name: "worker".to_string(),
            rejection: Arc::new(CallerRuns),
            queue_capacity: usize::MAX,
        }
    }

    /// Set the pool name, used by the thread factory to derive worker
    /// thread names.
    pub fn name<S: Into<String>>(mut self, val: S) -> Builder {
        self.name = val.into();
        self
    }

    /// Set the pool's core size.
    ///
    /// The number of threads to keep in the pool, even if they are idle.
    pub fn core_pool_size(mut self, val: usize) -> Builder {
        self.core_pool_size = val;
        self
    }

    /// Set the pool's maximum size.
    ///
    /// The maximum number of threads to allow in the pool.
    pub fn max_pool_size(mut self, val: usize) -> Builder {
        self.max_pool_size = val;
        self
    }

    /// Set the thread keep-alive duration.
    ///
    /// When the number of threads is greater than the core size, or core
    /// threads are allowed to time out, this is the maximum time that idle
    /// threads will wait for new jobs before retiring.
    pub fn keep_alive(mut self, val: Duration) -> Builder {
        self.keep_alive = Some(val);
        self
    }

    /// Allow core threads to retire after the keep-alive interval.
    pub fn allow_core_thread_timeout(mut self) -> Builder {
        self.allow_core_thread_timeout = true;
        self
    }

    /// Maximum number of jobs that can be pending in the work queue.
    ///
    /// Zero configures direct handoff: nothing buffers, and a submission
    /// that cannot be handed to a worker immediately goes to the rejection
    /// policy. `usize::MAX` (the default) is effectively unbounded.
    pub fn queue_capacity(mut self, val: usize) -> Builder {
        self.queue_capacity = val;
        self
    }

    /// Use a pre-built thread factory instead of one derived from the pool
    /// name, e.g. to install a privileged-spawn hook.
    pub fn thread_factory(mut self, val: ThreadFactory) -> Builder {
        self.factory = Some(val);
        self
    }

    /// Set the rejection policy consulted when the queue is full and the
    /// pool cannot grow.
    pub fn rejection_policy<P: RejectionPolicy + 'static>(mut self, val: P) -> Builder {
        self.rejection = Arc::new(val);
        self
    }

    /// Build and return the configured thread pool.
    pub fn build(self) -> ThreadPool {
        assert!(self.max_pool_size >= 1, "at least one thread required");
        assert!(
            self.core_pool_size <= self.max_pool_size,
            "`core_pool_size` cannot be greater than `max_pool_size`"
        );

        let direct_handoff = self.queue_capacity == 0;

        // A handoff pool still needs a channel for workers to park on; with
        // submissions never buffering, its capacity is irrelevant.
        let (tx, rx) = mpmc::channel(if direct_handoff { 1 } else { self.queue_capacity });

        let factory = self
            .factory
            .unwrap_or_else(|| ThreadFactory::new(&self.name));

        let inner = Arc::new(Inner {
            // Thread pool starts in the running state
            state: AtomicState::new(Lifecycle::Running),
            tx,
            rx,
            close: CloseFuture::new(),
            config: Config {
                core_pool_size: self.core_pool_size,
                max_pool_size: self.max_pool_size,
                keep_alive: self.keep_alive,
                allow_core_thread_timeout: self.allow_core_thread_timeout,
                direct_handoff,
                factory,
                rejection: self.rejection,
            },
        });

        ThreadPool { inner }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

// ===== impl ThreadPool =====

impl ThreadPool {
    /// Create a pool that reuses a fixed number of threads operating off a
    /// shared unbounded queue.
    ///
    /// At any point, at most `size` threads will be active processing jobs.
    /// If additional jobs are submitted when all threads are active, they
    /// will wait in the queue until a thread is available.
    pub fn fixed_size(name: &str, size: usize) -> ThreadPool {
        Builder::new()
            .name(name)
            .core_pool_size(size)
            .max_pool_size(size)
            .queue_capacity(usize::MAX)
            .build()
    }

    /// Create a pool with a single worker thread operating off an unbounded
    /// queue. Jobs are guaranteed to execute sequentially.
    pub fn single_thread(name: &str) -> ThreadPool {
        ThreadPool::fixed_size(name, 1)
    }

    /// Create a pool that grows on demand, hands jobs directly to workers
    /// without buffering, and retires threads idle for sixty seconds.
    pub fn cached(name: &str) -> ThreadPool {
        Builder::new()
            .name(name)
            .core_pool_size(0)
            .max_pool_size(CAPACITY)
            .keep_alive(Duration::from_secs(60))
            .queue_capacity(0)
            .build()
    }

    /// Start a core thread, causing it to idly wait for work.
    ///
    /// This overrides the default policy of starting core threads only when
    /// new jobs are submitted. Returns `false` if all core threads have
    /// already been started.
    pub fn prestart_core_thread(&self) -> bool {
        let wc = self.inner.state.load().worker_count();

        if wc < self.inner.config.core_pool_size {
            matches!(
                self.inner.add_worker(None, true, &self.inner),
                AddWorker::Added
            )
        } else {
            false
        }
    }

    /// Start all core threads, causing them to idly wait for work.
    pub fn prestart_core_threads(&self) {
        while self.prestart_core_thread() {}
    }

    /// Returns the current number of live worker threads.
    pub fn size(&self) -> usize {
        self.inner.state.load().worker_count()
    }

    /// Returns the current number of pending jobs.
    pub fn queued(&self) -> usize {
        self.inner.rx.len()
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<(), SubmitError> {
        self.inner.submit(job, &self.inner)
    }

    /// Initiate a close.
    ///
    /// Graceful: previously submitted jobs are executed, but no new jobs
    /// are accepted. Immediate: additionally, queued-but-unstarted jobs are
    /// abandoned (their handles observe `Abandoned`) and workers exit after
    /// the job they are currently running, if any.
    ///
    /// Does not wait for termination; use the returned future for that.
    /// Calling it again, in either mode, is safe: a graceful close can be
    /// upgraded to an immediate one, and every call returns the same future.
    fn close(&self, immediate: bool) -> CloseFuture {
        // Stop intake first so a submission racing with the close request
        // cannot slip in after the future reports Closing
        self.inner.rx.close();
        self.inner.close.request_close();

        if immediate && self.inner.state.try_transition_to_stop() {
            // Abandon queued jobs. Dropping a job drops its result channel,
            // which is how handle holders learn it will never run.
            while let Ok(job) = self.inner.rx.recv() {
                drop(job);
            }
        }

        // A pool whose workers have all exited (or that never spawned any)
        // has nobody left to report termination
        if self.inner.state.load().worker_count() == 0 {
            // A graceful close can find jobs still queued with every worker
            // gone (keep-alive retirement, or a spawn failure after the job
            // was accepted); they must run before the future resolves
            if self.inner.rx.len() > 0 {
                self.inner.ensure_worker(false, &self.inner);
            }

            if self.inner.state.load().worker_count() == 0 {
                // No worker could be started; deal with the stragglers
                // here. They still run while the close is graceful, but a
                // concurrent immediate close abandons them.
                while let Ok(job) = self.inner.rx.recv() {
                    if self.inner.state.load().lifecycle() == Lifecycle::Running {
                        let _ = panic::catch_unwind(AssertUnwindSafe(move || job()));
                    }
                }

                self.inner.finalize();
            }
        }

        self.inner.close.clone()
    }

    fn close_future(&self) -> CloseFuture {
        self.inner.close.clone()
    }
}

// ===== impl Inner =====

impl Inner {
    fn submit(&self, job: Job, arc: &Arc<Inner>) -> Result<(), SubmitError> {
        if !self.rx.is_open() {
            return Err(SubmitError::Closed);
        }

        if self.config.direct_handoff {
            return match self.add_worker(Some(job), false, arc) {
                AddWorker::Added => Ok(()),
                AddWorker::Saturated(job) => self.reject(job),
                AddWorker::Failed(job, err) => self.recover_spawn_failure(job, err),
            };
        }

        match self.tx.try_send(job) {
            Ok(()) => {
                // Ensure somebody will drain the queue: top up the core
                // threads, or start a single non-core worker for a pool
                // configured with zero core threads
                let wc = self.state.load().worker_count();

                if wc < self.config.core_pool_size {
                    self.ensure_worker(true, arc);
                } else if wc == 0 {
                    self.ensure_worker(false, arc);
                }

                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
            Err(TrySendError::Full(job)) => {
                // Try to grow the pool, handing the job to the new worker
                match self.add_worker(Some(job), false, arc) {
                    AddWorker::Added => Ok(()),
                    AddWorker::Saturated(job) => self.reject(job),
                    AddWorker::Failed(job, err) => self.recover_spawn_failure(job, err),
                }
            }
        }
    }

    fn reject(&self, job: Option<Job>) -> Result<(), SubmitError> {
        let job = match job {
            Some(job) => job,
            None => return Ok(()),
        };

        // Saturation can also mean the lifecycle moved past Running while
        // the submission was in flight; that is a close, not a rejection
        if !self.rx.is_open() {
            return Err(SubmitError::Closed);
        }

        self.config.rejection.rejected(job)
    }

    // The pool must not silently lose a job whose worker could not be
    // created: re-offer it to the queue, then let the rejection policy
    // decide
    fn recover_spawn_failure(&self, job: Option<Job>, err: io::Error) -> Result<(), SubmitError> {
        warn!("worker thread creation failed: {}", err);

        let job = match job {
            Some(job) => job,
            None => return Ok(()),
        };

        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
            Err(TrySendError::Full(job)) => match self.config.rejection.rejected(job) {
                Ok(()) => Ok(()),
                Err(_) => Err(SubmitError::Spawn(err)),
            },
        }
    }

    // Start a worker without an initial job, logging instead of failing the
    // submission that triggered it; the job it would have served is already
    // queued
    fn ensure_worker(&self, core: bool, arc: &Arc<Inner>) {
        if let AddWorker::Failed(_, err) = self.add_worker(None, core, arc) {
            warn!("failed to start worker for queued jobs: {}", err);
        }
    }

    fn add_worker(&self, job: Option<Job>, core: bool, arc: &Arc<Inner>) -> AddWorker {
        let mut state = self.state.load();

        'retry: loop {
            let lifecycle = state.lifecycle();

            if lifecycle >= Lifecycle::Stop {
                // Never create a new worker once the pool is stopping
                return AddWorker::Saturated(job);
            }

            loop {
                let wc = state.worker_count();

                // The number of threads that are expected to be running
                let target = if core {
                    self.config.core_pool_size
                } else {
                    self.config.max_pool_size
                };

                if wc >= CAPACITY || wc >= target {
                    return AddWorker::Saturated(job);
                }

                state = match self.state.compare_and_inc_worker_count(state) {
                    Ok(_) => break 'retry,
                    Err(state) => state,
                };

                if state.lifecycle() != lifecycle {
                    continue 'retry;
                }

                // CAS failed due to worker_count change; retry inner loop
            }
        }

        // == Spawn the thread ==

        let worker = Worker {
            rx: self.rx.clone(),
            inner: arc.clone(),
        };

        match worker.spawn(job) {
            Ok(()) => AddWorker::Added,
            Err((job, err)) => {
                // Release the reserved worker slot. If that slot was the
                // last thing keeping a closed-out pool from terminating,
                // this thread carries out the termination.
                let prev = self.state.fetch_dec_worker_count();

                if prev.worker_count() == 1 && !self.rx.is_open() && self.rx.len() == 0 {
                    self.finalize();
                }

                AddWorker::Failed(job, err)
            }
        }
    }

    // Re-reserve a worker slot for the current thread, without spawning.
    // Used by a retiring worker that discovers work was enqueued between
    // its emptiness check and its decrement.
    fn try_reacquire_worker_slot(&self) -> bool {
        let mut state = self.state.load();

        loop {
            if state.lifecycle() >= Lifecycle::Stop {
                return false;
            }

            let wc = state.worker_count();

            if wc >= CAPACITY || wc >= self.config.max_pool_size {
                // Another worker exists to drain the queue
                return false;
            }

            state = match self.state.compare_and_inc_worker_count(state) {
                Ok(_) => return true,
                Err(state) => state,
            };
        }
    }

    // Sole path to Closed on the bound close future; the Tidying transition
    // makes it single-shot under concurrent callers
    fn finalize(&self) {
        if self.state.try_transition_to_tidying() {
            self.state.transition_to_terminated();
            self.close.set_closed();
        }
    }
}

// ===== impl Worker ====

impl Worker {
    // Spawns the worker thread through the pool's thread factory. On
    // failure the initial job is handed back so the submission path can
    // re-queue it or apply the rejection policy.
    fn spawn(self, initial: Option<Job>) -> Result<(), (Option<Job>, io::Error)> {
        let inner = self.inner.clone();

        // The job must survive a refused spawn; park it where both sides
        // can reach it
        let slot = Arc::new(Mutex::new(initial));
        let thread_slot = slot.clone();

        let result = inner.config.factory.spawn(move || {
            let initial = thread_slot.lock().unwrap().take();
            self.run(initial);
        });

        match result {
            Ok(_handle) => Ok(()),
            Err(err) => Err((slot.lock().unwrap().take(), err)),
        }
    }

    fn run(self, mut initial: Option<Job>) {
        while let Some(job) = self.next_job(initial.take()) {
            // AssertUnwindSafe is used because jobs are `Send + 'static`,
            // which is essentially unwind safe
            let _ = panic::catch_unwind(AssertUnwindSafe(move || job()));
        }
    }

    // Gets the next job, blocking if necessary. Returns None if the worker
    // should shut down.
    fn next_job(&self, mut job: Option<Job>) -> Option<Job> {
        // Did the last `recv_job` call time out?
        let mut timed_out = false;
        let allow_core_thread_timeout = self.inner.config.allow_core_thread_timeout;
        let core_pool_size = self.inner.config.core_pool_size;

        loop {
            let state = self.inner.state.load();

            if state.lifecycle() >= Lifecycle::Stop {
                // No more jobs may run. A job grabbed off the queue just
                // before the stop is discarded, not executed.
                self.exit_worker();
                return None;
            }

            if job.is_some() {
                break;
            }

            let wc = state.worker_count();

            // Determine if there is a timeout for receiving the next job
            let timeout = if wc > core_pool_size || allow_core_thread_timeout {
                self.inner.config.keep_alive
            } else {
                None
            };

            if wc > self.inner.config.max_pool_size || (timeout.is_some() && timed_out) {
                // Only retire the last thread if the work queue is empty
                if wc > 1 || self.rx.len() == 0 {
                    if self.inner.state.compare_and_dec_worker_count(state) {
                        // A submission can land between the emptiness check
                        // and the decrement; take the slot back and keep
                        // draining instead of stranding the job in a
                        // workerless pool
                        if self.rx.len() > 0 && self.inner.try_reacquire_worker_slot() {
                            timed_out = false;
                            continue;
                        }

                        // The queue may have been closed while this worker
                        // sat idle; a retiring last worker must still
                        // terminate the pool
                        if wc == 1 && !self.rx.is_open() && self.rx.len() == 0 {
                            self.inner.finalize();
                        }

                        return None;
                    }

                    // CAS failed, restart loop
                    continue;
                }
            }

            match self.recv_job(timeout) {
                Ok(next) => {
                    // Grab the job, but the loop will restart in order to
                    // check the state again. If the state transitioned to
                    // Stop while the worker was blocked on the queue, the
                    // job should be discarded and the worker shut down.
                    job = Some(next);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Queue closed and fully drained; exit the worker
                    self.exit_worker();
                    return None;
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                }
            }
        }

        job
    }

    fn recv_job(&self, timeout: Option<Duration>) -> Result<Job, RecvTimeoutError> {
        match timeout {
            Some(timeout) => self.rx.recv_timeout(timeout),
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        }
    }

    fn exit_worker(&self) {
        let prev = self.inner.state.fetch_dec_worker_count();

        // A non-empty closed queue here means an immediate close is still
        // draining; that close finalizes once its drain completes, so the
        // future must not resolve yet
        if prev.worker_count() == 1 && !self.rx.is_open() && self.rx.len() == 0 {
            self.inner.finalize();
        }
    }
}
