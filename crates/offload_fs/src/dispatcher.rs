// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{Level, event};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    max_threads: usize,
    idle_timeout: Duration,
    thread_name: String,
}

impl WorkerPoolConfig {
    /// The default upper bound on worker threads.
    pub const DEFAULT_MAX_THREADS: usize = 4;

    /// The default time an idle worker waits for a job before exiting.
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

    /// The default name given to worker threads.
    pub const DEFAULT_THREAD_NAME: &'static str = "offload-fs-worker";

    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_threads: Self::DEFAULT_MAX_THREADS,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            thread_name: Self::DEFAULT_THREAD_NAME.to_owned(),
        }
    }

    /// Sets the upper bound on worker threads. Values below one are raised
    /// to one.
    #[must_use]
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    /// Sets how long a worker above the first waits for a job before it
    /// exits.
    #[must_use]
    pub const fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the name given to worker threads.
    #[must_use]
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by the pool handles and the worker threads.
///
/// Workers hold only this and the receiving end of the queue. The sending end
/// lives in the [`WorkerPool`] handles, so dropping the last handle
/// disconnects the queue and every worker exits once it has drained it.
struct PoolShared {
    config: WorkerPoolConfig,
    receiver: flume::Receiver<Job>,
    thread_count: AtomicUsize,
    pending_count: AtomicUsize,
}

/// A bounded pool of threads that executes blocking filesystem work.
///
/// Starts with a single worker thread and scales up to the configured maximum
/// when the pending-job count reaches the current thread count. Idle workers
/// scale back down after the configured idle timeout, always leaving one
/// worker alive while any handle to the pool exists.
///
/// Jobs are queued without limit: a saturated pool delays work but never
/// rejects it. Once every clone of a pool is dropped, its workers finish the
/// queued jobs and exit.
#[derive(Clone)]
pub struct WorkerPool {
    sender: flume::Sender<Job>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates a new pool with one initial worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial worker thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig) -> std::io::Result<Self> {
        let (sender, receiver) = flume::unbounded();
        let pool = Self {
            sender,
            shared: Arc::new(PoolShared {
                config,
                receiver,
                thread_count: AtomicUsize::new(1),
                pending_count: AtomicUsize::new(0),
            }),
        };
        Self::spawn_worker_already_counted(&pool.shared)?;
        Ok(pool)
    }

    /// Returns the process-wide pool, creating it with the default
    /// configuration on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool does not exist yet and its initial worker
    /// thread cannot be spawned.
    pub fn shared() -> std::io::Result<Self> {
        static SHARED: Mutex<Option<WorkerPool>> = Mutex::new(None);

        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = shared.as_ref() {
            return Ok(pool.clone());
        }
        let pool = Self::new(WorkerPoolConfig::default())?;
        *shared = Some(pool.clone());
        Ok(pool)
    }

    /// Queues a job for execution on a worker thread.
    ///
    /// The job must not panic; callers wrap fallible or panicking work before
    /// submitting it.
    pub(crate) fn submit(&self, job: Job) {
        let shared = &self.shared;
        let prev_pending = shared.pending_count.fetch_add(1, Ordering::Relaxed);
        let threads = shared.thread_count.load(Ordering::Acquire);

        // Scale up if the queue is backing up and we haven't hit the limit.
        if prev_pending >= threads
            && threads < shared.config.max_threads
            && shared
                .thread_count
                .compare_exchange(threads, threads + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            && let Err(err) = Self::spawn_worker_already_counted(shared)
        {
            let _ = shared.thread_count.fetch_sub(1, Ordering::AcqRel);
            event!(Level::WARN, error = %err, "failed to grow worker pool; job stays queued");
        }

        // `shared` owns the receiver, so the channel cannot be disconnected.
        let _ = self.sender.send(job);
    }

    /// The number of worker threads currently alive.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count.load(Ordering::Relaxed)
    }

    /// The number of jobs submitted but not yet finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count.load(Ordering::Relaxed)
    }

    /// Spawns a worker thread, assuming the caller already incremented the count.
    fn spawn_worker_already_counted(shared: &Arc<PoolShared>) -> std::io::Result<()> {
        let worker_shared = Arc::clone(shared);
        let _ = std::thread::Builder::new()
            .name(shared.config.thread_name.clone())
            .spawn(move || {
                Self::worker_loop(&worker_shared);
            })?;
        event!(
            Level::DEBUG,
            threads = shared.thread_count.load(Ordering::Relaxed),
            "worker thread started"
        );
        Ok(())
    }

    fn worker_loop(shared: &PoolShared) {
        loop {
            match shared.receiver.recv_timeout(shared.config.idle_timeout) {
                Ok(job) => {
                    job();
                    let _ = shared.pending_count.fetch_sub(1, Ordering::Relaxed);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    // Scale down: CAS ensures at least one worker remains.
                    let mut count = shared.thread_count.load(Ordering::Relaxed);
                    while count > 1 {
                        match shared
                            .thread_count
                            .compare_exchange_weak(count, count - 1, Ordering::AcqRel, Ordering::Relaxed)
                        {
                            Ok(_) => {
                                event!(Level::DEBUG, threads = count - 1, "idle worker thread exiting");
                                return;
                            }
                            Err(actual) => count = actual,
                        }
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    let remaining = shared.thread_count.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
                    event!(Level::DEBUG, threads = remaining, "pool dropped; worker thread exiting");
                    return;
                }
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.shared.thread_count.load(Ordering::Relaxed))
            .field("pending", &self.shared.pending_count.load(Ordering::Relaxed))
            .field("max_threads", &self.shared.config.max_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Barrier;

    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn runs_jobs_on_named_worker_threads() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().thread_name("pool-test")).unwrap();
        let (tx, rx) = flume::bounded(1);

        pool.submit(Box::new(move || {
            tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        }));

        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_deref(), Some("pool-test"));
    }

    #[test]
    fn grows_up_to_the_configured_maximum() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().max_threads(3)).unwrap();
        let barrier = Arc::new(Barrier::new(4));
        let (tx, rx) = flume::unbounded();

        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                tx.send(std::thread::current().id()).unwrap();
                let _ = barrier.wait();
            }));
        }

        // All three jobs block on the barrier together, so they must be
        // running on three distinct workers.
        let ids: HashSet<_> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(ids.len(), 3);
        assert!(pool.thread_count() <= 3);
        let _ = barrier.wait();
    }

    #[test]
    fn saturated_pool_queues_instead_of_rejecting() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().max_threads(1)).unwrap();
        let (tx, rx) = flume::unbounded();

        for i in 0..32 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap()));
        }

        let received: Vec<_> = (0..32).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(received, (0..32).collect::<Vec<_>>());
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn idle_workers_scale_down_to_one() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::new()
                .max_threads(2)
                .idle_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let barrier = Arc::new(Barrier::new(3));

        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            pool.submit(Box::new(move || {
                let _ = barrier.wait();
            }));
        }
        let _ = barrier.wait();

        let deadline = std::time::Instant::now() + WAIT;
        while pool.thread_count() > 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn zero_max_threads_is_raised_to_one() {
        let config = WorkerPoolConfig::new().max_threads(0);
        assert_eq!(config.max_threads, 1);
    }

    #[test]
    fn shared_pool_is_a_singleton() {
        let a = WorkerPool::shared().unwrap();
        let b = WorkerPool::shared().unwrap();
        assert!(Arc::ptr_eq(&a.shared, &b.shared));
    }

    #[test]
    fn dropping_the_last_handle_stops_the_workers() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().max_threads(2)).unwrap();
        let clone = pool.clone();
        let shared = Arc::downgrade(&pool.shared);
        let (tx, rx) = flume::unbounded();

        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap()));
        }
        drop(pool);
        drop(clone);

        // Jobs queued before the drop still run.
        let mut received: Vec<_> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        received.sort_unstable();
        assert_eq!(received, [0, 1, 2, 3]);

        // Each worker releases the shared state when it exits.
        let deadline = std::time::Instant::now() + WAIT;
        while shared.strong_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(shared.strong_count(), 0);
    }

    #[test]
    fn a_live_clone_keeps_the_pool_running() {
        let pool = WorkerPool::new(WorkerPoolConfig::new().idle_timeout(Duration::from_millis(10))).unwrap();
        let clone = pool.clone();
        drop(pool);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(clone.thread_count(), 1);

        let (tx, rx) = flume::bounded(1);
        clone.submit(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(WAIT).unwrap();
    }
}
