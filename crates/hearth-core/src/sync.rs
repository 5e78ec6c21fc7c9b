//! Counting semaphores for loader threads.
//!
//! Loader threads park on a [`Semaphore`] when there is nothing to do; producers
//! release one permit per unit of work. `release_n` is used at teardown to wake
//! every parked thread at once.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A counting semaphore built on a mutex-guarded counter and a condition variable.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Release one permit, waking at most one waiter.
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits = permits.saturating_add(1);
        self.available.notify_one();
    }

    /// Release `n` permits, waking up to `n` waiters.
    pub fn release_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits = permits.saturating_add(n);
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Block until a permit is available, then take it.
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Block until a permit is available or `timeout` elapses.
    ///
    /// Returns `true` if a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                if *permits == 0 {
                    return false;
                }
                break;
            }
        }
        *permits -= 1;
        true
    }

    /// Take a permit if one is immediately available.
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Number of permits currently held by the semaphore.
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_signal_then_wait() {
        let sem = Semaphore::new(0);
        sem.signal();
        sem.wait();
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn test_try_wait() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_release_n_wakes_all_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let woken = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                let woken = Arc::clone(&woken);
                thread::spawn(move || {
                    sem.wait();
                    woken.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        sem.release_n(4);
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        assert_eq!(sem.available_permits(), 0);
    }
}
