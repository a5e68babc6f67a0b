//! Counting primitive untuk drain saat shutdown
//!
//! Each active connection holds a [`WaitGuard`]; dropping the guard counts
//! down, so a connection thread that panics still releases its slot.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    count: Mutex<usize>,
    zero: Condvar,
}

/// Wait group: counter yang bisa ditunggu sampai nol
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

/// Slot aktif dalam wait group. Counts down on drop.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the slot"]
pub struct WaitGuard {
    inner: Arc<Inner>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and hand back the guard that undoes it.
    pub fn add(&self) -> WaitGuard {
        *self.inner.lock() += 1;
        WaitGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Current number of outstanding guards.
    pub fn count(&self) -> usize {
        *self.inner.lock()
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.inner.lock();
        while *count > 0 {
            count = self
                .inner
                .zero
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        let mut count = self.inner.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.zero.notify_all();
        }
    }
}
