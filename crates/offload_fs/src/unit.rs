// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Execution units: the single-threaded contexts that completion callbacks
//! are delivered to.

use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{Level, event};

/// A unit of work submitted to an [`ExecutionUnit`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded context to which work can be submitted.
///
/// Implementations must run submitted tasks one at a time, in submission
/// order, and never concurrently with each other. Completion callbacks of
/// non-blocking filesystem operations are delivered through this trait, which
/// is what lets application code running on the unit use their results
/// without further synchronization.
pub trait ExecutionUnit: Send + Sync + fmt::Debug {
    /// The identity of this unit.
    fn id(&self) -> UnitId;

    /// Schedules `task` to run on this unit.
    ///
    /// # Errors
    ///
    /// Returns the task back if the unit no longer accepts work.
    fn execute(&self, task: Task) -> Result<(), Task>;
}

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_UNIT: Cell<Option<UnitId>> = const { Cell::new(None) };
}

/// Identifies an [`ExecutionUnit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocates a new, process-unique identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the identity of the unit running on the current thread, or
    /// `None` if the current thread does not belong to an execution unit.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_UNIT.with(Cell::get)
    }

    /// Marks the current thread as running this unit until the returned guard
    /// is dropped.
    ///
    /// Custom [`ExecutionUnit`] implementations call this around the tasks
    /// they run so that [`UnitId::current`] reports them.
    #[must_use = "the thread is only marked while the guard is alive"]
    pub fn enter(self) -> EnterGuard {
        let previous = CURRENT_UNIT.with(|current| current.replace(Some(self)));
        EnterGuard { previous }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Restores the previous [`UnitId::current`] value when dropped.
#[derive(Debug)]
pub struct EnterGuard {
    previous: Option<UnitId>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_UNIT.with(|current| current.set(self.previous));
    }
}

enum Message {
    Run(Task),
    Stop,
}

struct EventLoopInner {
    id: UnitId,
    name: String,
    sender: flume::Sender<Message>,
    // Guards the sender so that no task can be queued behind `Stop`.
    closed: Mutex<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// An [`ExecutionUnit`] backed by one dedicated thread draining a task queue.
///
/// Cloning an `EventLoop` produces another handle to the same thread. The
/// thread exits once [`shutdown`](Self::shutdown) is called or every handle is
/// dropped.
///
/// A task that panics is logged and discarded; the loop keeps running.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<EventLoopInner>,
}

impl EventLoop {
    /// Starts a new event loop on a thread with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to create the thread.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let id = UnitId::next();
        let (sender, receiver) = flume::unbounded::<Message>();

        let thread = std::thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = id.enter();
            while let Ok(Message::Run(task)) = receiver.recv() {
                if std::panic::catch_unwind(core::panic::AssertUnwindSafe(task)).is_err() {
                    event!(Level::ERROR, unit = %id, "task panicked on event loop");
                }
            }
            event!(Level::DEBUG, unit = %id, "event loop stopped");
        })?;

        event!(Level::DEBUG, unit = %id, name = %name, "event loop started");

        Ok(Self {
            inner: Arc::new(EventLoopInner {
                id,
                name,
                sender,
                closed: Mutex::new(false),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// The thread name this loop was started with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stops the loop after the tasks already queued have run, and waits for
    /// the thread to exit.
    ///
    /// Tasks submitted after this call are rejected. Calling `shutdown` from a
    /// task running on the loop itself stops the loop without waiting.
    pub fn shutdown(&self) {
        {
            let mut closed = self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if !*closed {
                *closed = true;
                let _ = self.inner.sender.send(Message::Stop);
            }
        }

        if UnitId::current() == Some(self.inner.id) {
            return;
        }

        let handle = self.inner.thread.lock().ok().and_then(|mut thread| thread.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            event!(Level::ERROR, unit = %self.inner.id, "event loop thread panicked");
        }
    }
}

impl ExecutionUnit for EventLoop {
    fn id(&self) -> UnitId {
        self.inner.id
    }

    fn execute(&self, task: Task) -> Result<(), Task> {
        let closed = self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(task);
        }
        self.inner.sender.send(Message::Run(task)).map_err(|err| match err.into_inner() {
            Message::Run(task) => task,
            Message::Stop => unreachable!("only run messages are sent here"),
        })
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("queued", &self.inner.sender.len())
            .finish()
    }
}
