// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{Level, event};

use crate::dispatcher::WorkerPool;
use crate::error::{Error, Result};
use crate::unit::ExecutionUnit;

type Work<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

/// One unit of blocking filesystem work that can be run in either of two ways.
///
/// * [`run_blocking`](Self::run_blocking) executes the work on the calling
///   thread and returns its outcome directly.
/// * [`run_async`](Self::run_async) submits the work to the worker pool and
///   returns immediately. The outcome is later delivered to a completion
///   callback on the execution unit captured when the operation was created,
///   never on the worker thread.
///
/// Both methods consume the operation, so its work runs exactly once. There is
/// no cancellation: once submitted, the work runs to completion or failure.
pub struct Operation<T> {
    name: &'static str,
    work: Work<T>,
    unit: Arc<dyn ExecutionUnit>,
    pool: WorkerPool,
}

impl<T: Send + 'static> Operation<T> {
    pub(crate) fn new(
        name: &'static str,
        pool: WorkerPool,
        unit: Arc<dyn ExecutionUnit>,
        work: impl FnOnce() -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            name,
            work: Box::new(work),
            unit,
            pool,
        }
    }

    /// The name of the operation, used in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the work on the calling thread, blocking until it finishes.
    ///
    /// # Errors
    ///
    /// Returns whatever classified failure the work produced.
    pub fn run_blocking(self) -> Result<T> {
        event!(Level::TRACE, op = self.name, "running blocking");
        let outcome = (self.work)();
        log_failure(self.name, outcome.as_ref().err());
        outcome
    }

    /// Submits the work to the worker pool and returns immediately.
    ///
    /// `on_complete` receives either the value or the classified failure,
    /// exactly once, on the execution unit this operation was created for.
    /// A panic inside the work is caught on the worker and delivered as an
    /// [`Error::Io`] failure.
    ///
    /// If the execution unit no longer accepts work by the time the outcome is
    /// ready, the outcome is dropped and a warning is logged.
    pub fn run_async(self, on_complete: impl FnOnce(Result<T>) + Send + 'static) {
        let Self { name, work, unit, pool } = self;
        event!(Level::TRACE, op = name, unit = %unit.id(), "dispatching to worker pool");

        pool.submit(Box::new(move || {
            let outcome = match std::panic::catch_unwind(core::panic::AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    event!(Level::ERROR, op = name, panic = message, "operation panicked on worker thread");
                    Err(Error::Io {
                        subject: name.to_owned(),
                        source: std::io::Error::other(format!("operation panicked: {message}")),
                    })
                }
            };
            log_failure(name, outcome.as_ref().err());

            if unit.execute(Box::new(move || on_complete(outcome))).is_err() {
                event!(
                    Level::WARN,
                    op = name,
                    unit = %unit.id(),
                    "execution unit rejected completion; outcome dropped"
                );
            }
        }));
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("unit", &self.unit.id())
            .finish_non_exhaustive()
    }
}

fn log_failure(name: &'static str, error: Option<&Error>) {
    if let Some(error) = error {
        event!(Level::DEBUG, op = name, error = %error, "operation failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use core::time::Duration;

    use super::*;
    use crate::dispatcher::WorkerPoolConfig;
    use crate::error::ErrorKind;
    use crate::unit::{EventLoop, UnitId};

    const WAIT: Duration = Duration::from_secs(10);

    fn fixture() -> (WorkerPool, EventLoop) {
        let pool = WorkerPool::new(WorkerPoolConfig::new()).unwrap();
        let event_loop = EventLoop::spawn("operation-test").unwrap();
        (pool, event_loop)
    }

    fn unit(event_loop: &EventLoop) -> Arc<dyn ExecutionUnit> {
        Arc::new(event_loop.clone())
    }

    #[test]
    fn run_blocking_executes_on_caller_thread() {
        let (pool, event_loop) = fixture();
        let caller = std::thread::current().id();
        let op = Operation::new("thread_check", pool, unit(&event_loop), move || Ok(std::thread::current().id()));

        assert_eq!(op.run_blocking().unwrap(), caller);
        event_loop.shutdown();
    }

    #[test]
    fn run_blocking_returns_failure() {
        let (pool, event_loop) = fixture();
        let op: Operation<()> = Operation::new("fail", pool, unit(&event_loop), || {
            Err(Error::invalid_argument("nope"))
        });

        assert_eq!(op.run_blocking().unwrap_err().kind(), ErrorKind::InvalidArgument);
        event_loop.shutdown();
    }

    #[test]
    fn run_async_delivers_on_captured_unit() {
        let (pool, event_loop) = fixture();
        let (tx, rx) = flume::bounded(1);
        let op = Operation::new("thread_check", pool, unit(&event_loop), || {
            Ok(std::thread::current().name().map(str::to_owned))
        });

        op.run_async(move |outcome| {
            tx.send((outcome.unwrap(), UnitId::current())).unwrap();
        });

        let (worker_name, delivered_on) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(worker_name.as_deref(), Some("offload-fs-worker"));
        assert_eq!(delivered_on, Some(event_loop.id()));
        event_loop.shutdown();
    }

    #[test]
    fn run_async_executes_work_exactly_once() {
        let (pool, event_loop) = fixture();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = flume::unbounded();

        let counter = Arc::clone(&runs);
        Operation::new("count", pool, unit(&event_loop), move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .run_async(move |outcome| tx.send(outcome.is_ok()).unwrap());

        assert!(rx.recv_timeout(WAIT).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        event_loop.shutdown();
    }

    #[test]
    fn run_async_converts_panic_to_io_failure() {
        let (pool, event_loop) = fixture();
        let (tx, rx) = flume::bounded(1);

        Operation::<()>::new("explode", pool, unit(&event_loop), || panic!("kaboom"))
            .run_async(move |outcome| tx.send(outcome).unwrap());

        let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("kaboom"));
        event_loop.shutdown();
    }

    #[test]
    fn run_async_to_stopped_unit_drops_outcome() {
        let (pool, event_loop) = fixture();
        event_loop.shutdown();
        let (done_tx, done_rx) = flume::bounded(1);
        let (callback_tx, callback_rx) = flume::bounded::<()>(1);

        Operation::new("orphan", pool.clone(), unit(&event_loop), move || {
            done_tx.send(()).unwrap();
            Ok(())
        })
        .run_async(move |_| callback_tx.send(()).unwrap());

        done_rx.recv_timeout(WAIT).unwrap();
        assert!(callback_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
