//! Async task execution pool.
//!
//! Decode work is offloaded here so loader threads can go back to draining the
//! request queue while parsing runs in parallel.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_executor::{Executor, Task};
use parking_lot::Mutex;

use crate::sync::Semaphore;

/// How long an idle pool thread parks before re-checking the executor.
const IDLE_PARK: Duration = Duration::from_millis(5);

struct PoolShared {
    executor: Executor<'static>,
    wake: Semaphore,
    shutdown: AtomicBool,
}

/// A thread pool for executing async tasks.
///
/// # Example
///
/// ```ignore
/// use hearth_core::TaskPool;
///
/// let pool = TaskPool::new(4);
/// let task = pool.spawn(async { 42 });
/// assert_eq!(pollster::block_on(task), 42);
/// ```
pub struct TaskPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    thread_count: usize,
}

impl TaskPool {
    /// Create a new task pool with the specified number of threads.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0 or a thread cannot be spawned.
    pub fn new(num_threads: usize) -> Self {
        Self::with_name("hearth-task", num_threads)
    }

    /// Create a pool whose threads are named `{prefix}-{i}`.
    pub fn with_name(prefix: &str, num_threads: usize) -> Self {
        assert!(num_threads > 0, "TaskPool must have at least one thread");

        let shared = Arc::new(PoolShared {
            executor: Executor::new(),
            wake: Semaphore::new(0),
            shutdown: AtomicBool::new(false),
        });
        let mut threads = Vec::with_capacity(num_threads);

        for i in 0..num_threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, i))
                .spawn(move || run_pool_thread(&shared))
                .expect("Failed to spawn task pool thread");
            threads.push(handle);
        }

        tracing::debug!("TaskPool '{}' created with {} threads", prefix, num_threads);

        Self {
            shared,
            threads: Mutex::new(threads),
            thread_count: num_threads,
        }
    }

    /// Create a pool sized `max(1, num_cpus - 1)`, leaving a core for the caller.
    pub fn default_threads() -> Self {
        let num_threads = num_cpus::get().saturating_sub(1).max(1);
        Self::new(num_threads)
    }

    /// Spawn an async task on the pool.
    pub fn spawn<T>(&self, future: impl Future<Output = T> + Send + 'static) -> Task<T>
    where
        T: Send + 'static,
    {
        let task = self.shared.executor.spawn(future);
        self.shared.wake.signal();
        task
    }

    /// Spawn a task whose result nobody waits for.
    pub fn spawn_detached(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.spawn(future).detach();
    }

    /// Get the number of threads in this pool.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Stop the pool threads and wait for them to exit.
    ///
    /// Tasks still queued when shutdown begins are dropped with the executor.
    pub fn shutdown(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        tracing::debug!("Shutting down TaskPool with {} threads", threads.len());

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.release_n(threads.len());

        for handle in threads {
            if let Err(e) = handle.join() {
                tracing::error!("Task pool thread panicked: {:?}", e);
            }
        }
    }
}

fn run_pool_thread(shared: &PoolShared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        if !shared.executor.try_tick() {
            shared.wake.wait_timeout(IDLE_PARK);
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_pool_creation() {
        let pool = TaskPool::new(2);
        assert_eq!(pool.thread_count(), 2);
    }

    #[test]
    fn test_spawn_and_await() {
        let pool = TaskPool::new(2);
        let task = pool.spawn(async { 42 });
        assert_eq!(pollster::block_on(task), 42);
    }

    #[test]
    fn test_detached_tasks_run() {
        let pool = TaskPool::new(2);
        let done = Arc::new(Semaphore::new(0));
        for _ in 0..8 {
            let done = Arc::clone(&done);
            pool.spawn_detached(async move { done.signal() });
        }
        for _ in 0..8 {
            assert!(done.wait_timeout(Duration::from_secs(5)));
        }
    }

    #[test]
    #[should_panic(expected = "TaskPool must have at least one thread")]
    fn test_zero_threads_panics() {
        TaskPool::new(0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = TaskPool::new(2);
        let _task = pool.spawn(async { 1 });
        pool.shutdown();
        pool.shutdown();
    }
}
