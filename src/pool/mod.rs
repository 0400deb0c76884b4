//! Bounded worker pool for connection-handling tasks.
//!
//! The pool keeps between `min_workers` and `max_workers` worker tasks and a
//! bounded queue of pending work. [`WorkerPool::submit`] never blocks: when
//! the queue is full and every worker slot is taken, the task is rejected and
//! handed back to the caller's judgement (the acceptor drops the connection).
//!
//! Admission follows the classic executor policy:
//!
//! 1. below `min_workers`, start a new worker with the task;
//! 2. otherwise queue it, if a worker is idle or the queue has room;
//! 3. otherwise start a new worker, up to `max_workers`;
//! 4. otherwise reject.
//!
//! Workers above `min_workers` retire after `idle_timeout` without work.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, trace};

/// A unit of work accepted by the pool.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Sizing for a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 16,
            max_workers: 64,
            queue_capacity: 10,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<Task>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Notify,
    min_workers: usize,
    max_workers: usize,
    queue_capacity: usize,
    idle_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // The lock is never held across user code, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded pool of tokio worker tasks.
///
/// Cloning is cheap and yields a handle to the same pool.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use staticd::pool::{PoolConfig, WorkerPool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = WorkerPool::new(PoolConfig {
///     min_workers: 1,
///     max_workers: 1,
///     queue_capacity: 0,
///     idle_timeout: Duration::from_secs(60),
/// });
///
/// let (tx, rx) = tokio::sync::oneshot::channel::<()>();
/// assert!(pool.submit(async move { let _ = rx.await; }));
/// // The only worker is busy and the queue has no room.
/// assert!(!pool.submit(async {}));
/// tx.send(()).unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Creates an empty pool; workers are started on demand.
    ///
    /// `min_workers` is clamped to `max_workers`, and `max_workers` to at least one.
    pub fn new(config: PoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                available: Notify::new(),
                min_workers: config.min_workers.min(max_workers),
                max_workers,
                queue_capacity: config.queue_capacity,
                idle_timeout: config.idle_timeout,
            }),
        }
    }

    /// Offers `task` to the pool.
    ///
    /// Returns `false` if the pool is saturated or shut down; the task is
    /// dropped in that case. Must be called from within a tokio runtime.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task: Task = Box::pin(task);
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.shutdown {
            return false;
        }

        if state.workers < shared.min_workers {
            state.workers += 1;
            drop(state);
            self.spawn_worker(task);
            return true;
        }

        // Tasks claimed by idle workers do not count against the queue capacity.
        if state.queue.len() < state.idle + shared.queue_capacity {
            state.queue.push_back(task);
            drop(state);
            shared.available.notify_one();
            return true;
        }

        if state.workers < shared.max_workers {
            state.workers += 1;
            drop(state);
            self.spawn_worker(task);
            return true;
        }

        trace!(
            workers = state.workers,
            queued = state.queue.len(),
            "worker pool saturated"
        );
        false
    }

    /// Stops accepting work. Queued tasks still run; idle workers retire.
    pub fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.available.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Live worker count.
    pub fn workers(&self) -> usize {
        self.shared.lock().workers
    }

    /// Workers currently waiting for a task.
    pub fn idle_workers(&self) -> usize {
        self.shared.lock().idle
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    fn spawn_worker(&self, first: Task) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut slot = WorkerSlot {
                shared: Arc::clone(&shared),
                held: true,
            };
            trace!("worker started");
            let mut next = Some(first);
            while let Some(task) = next.take() {
                // A panicking task must not take its worker down with it.
                if let Err(e) = tokio::spawn(task).await {
                    error!(error = %e, "pool task failed");
                }
                next = next_task(&shared).await;
            }
            // next_task released the slot under the lock.
            slot.held = false;
            trace!("worker retired");
        });
    }
}

/// Waits for the next queued task.
///
/// Returns `None` when the worker should exit: on shutdown with an empty
/// queue, or after `idle_timeout` when the pool is above `min_workers`.
/// The worker count is decremented before `None` is returned.
async fn next_task(shared: &Shared) -> Option<Task> {
    loop {
        let notified = shared.available.notified();
        tokio::pin!(notified);

        let may_retire = {
            let mut state = shared.lock();
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.shutdown {
                state.workers -= 1;
                return None;
            }
            // Register interest before releasing the lock so a submit in
            // between cannot be missed.
            notified.as_mut().enable();
            state.idle += 1;
            state.workers > shared.min_workers
        };

        let timed_out = if may_retire {
            tokio::time::timeout(shared.idle_timeout, notified)
                .await
                .is_err()
        } else {
            notified.await;
            false
        };

        let mut state = shared.lock();
        state.idle -= 1;
        if let Some(task) = state.queue.pop_front() {
            return Some(task);
        }
        if state.shutdown || (timed_out && state.workers > shared.min_workers) {
            state.workers -= 1;
            debug!(workers = state.workers, "worker retiring");
            return None;
        }
    }
}

/// Releases the worker slot if the worker ends without going through
/// [`next_task`].
struct WorkerSlot {
    shared: Arc<Shared>,
    held: bool,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if self.held {
            self.shared.lock().workers -= 1;
        }
    }
}
